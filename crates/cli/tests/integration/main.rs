//! End-to-end tests driving the `kiln` binary.
//!
//! Commands run under `/bin/sh`, so the scenarios are Unix-only.

#[cfg(unix)]
mod build_tests;
#[cfg(unix)]
mod check_tests;
mod clean_tests;
mod common;
