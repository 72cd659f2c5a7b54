//! Tests of the public library API: evaluation through execution to a report.

mod evaluation_tests;
#[cfg(unix)]
mod pipeline_tests;
