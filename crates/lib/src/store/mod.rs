//! Artifact store: resolving package references and realizing environments.
//!
//! The evaluator calls [`ArtifactStore::resolve`] for every package reachable
//! from a declaration; the executor calls [`ArtifactStore::realize`] when a
//! `MaterializeEnvironment` node runs. Both are synchronous; the executor
//! moves `realize` onto a blocking thread.

mod local;
pub mod lock;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::package::PackageRef;
use crate::util::hash::Hashable;

pub use local::LocalStore;
pub use lock::{LockMode, StoreLock, StoreLockError};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("package '{identifier}' not found: {reason}")]
  NotFound { identifier: String, reason: String },

  #[error("package '{identifier}' cannot be resolved: {reason}")]
  Unsupported { identifier: String, reason: String },

  #[error("failed to realize environment at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A package pinned to a concrete location on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
  pub package: PackageRef,
  /// An executable file or a directory of executables (or a prefix with `bin/`).
  pub local_path: PathBuf,
}

/// An environment with every package resolved, ready to materialize.
///
/// This is the identity of a `MaterializeEnvironment` node: two environments
/// with equal resolved closures share one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedClosure {
  /// Keyed by package name.
  pub packages: BTreeMap<String, ResolvedPackage>,
  pub variables: BTreeMap<String, String>,
}

impl Hashable for ResolvedClosure {}

/// A realized environment: what a command's process environment is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedEnv {
  /// Directories joined into `PATH`, in order.
  pub path_entries: Vec<PathBuf>,
  pub variables: BTreeMap<String, String>,
}

impl MaterializedEnv {
  /// Whether every `PATH` entry still exists.
  pub fn is_intact(&self) -> bool {
    self.path_entries.iter().all(|p| p.exists())
  }
}

/// Resolves package references and realizes environments.
pub trait ArtifactStore: Send + Sync {
  /// Pin `package` to a location.
  fn resolve(&self, package: &PackageRef) -> Result<ResolvedPackage, StoreError>;

  /// Make `closure` usable, placing any generated files under `dest`.
  fn realize(&self, closure: &ResolvedClosure, dest: &Path) -> Result<MaterializedEnv, StoreError>;
}
