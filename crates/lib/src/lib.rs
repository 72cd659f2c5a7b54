//! kiln-lib: declarative project checks and builds.
//!
//! Projects declare environments (tool closures plus variables), checks and
//! an optional build. The crate turns them into a content-addressed graph
//! and runs it:
//! - `project` / `env`: the construction API and environment algebra
//! - `eval`: declarations to a `BuildGraph`, resolving packages via a `store`
//! - `execute`: concurrent, cache-consulting execution with cancellation
//! - `cache`: persistent results, logs and build outputs
//! - `report`: per-target statuses and the aggregate outcome

pub mod cache;
pub mod config;
pub mod consts;
pub mod env;
pub mod eval;
pub mod execute;
pub mod graph;
pub mod package;
pub mod platform;
pub mod project;
pub mod report;
pub mod store;
pub mod util;
