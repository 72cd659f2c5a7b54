//! Package references.
//!
//! A [`PackageRef`] names a buildable unit (a toolchain, library or
//! derivation). Its identity is the hash of its descriptor, so two refs built
//! independently from the same name, version and source are the same package.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::OBJ_HASH_PREFIX_LEN;
use crate::util::hash::{Hashable, ObjectHash, hash_bytes};

/// Where a package comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PackageSource {
  /// Resolved by name (and version) through the artifact store.
  Registry,
  /// A directory or file already on disk.
  Path { path: PathBuf },
  /// The output of a check. Checks produce logs, not artifacts, so the
  /// evaluator rejects environments that reference one.
  CheckOutput { project: String, check: String },
}

#[derive(Serialize)]
struct Descriptor<'a> {
  name: &'a str,
  version: Option<&'a str>,
  source: &'a PackageSource,
}

impl Hashable for Descriptor<'_> {}

/// A reference to a buildable unit.
///
/// Equality and `Hash` only look at [`PackageRef::hash`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRef {
  pub name: String,
  pub version: Option<String>,
  pub source: PackageSource,
  pub hash: ObjectHash,
}

impl PackageRef {
  /// Create a reference and compute its identity hash.
  pub fn new(name: impl Into<String>, version: Option<String>, source: PackageSource) -> Self {
    let name = name.into();
    let hash = Descriptor {
      name: &name,
      version: version.as_deref(),
      source: &source,
    }
    .compute_hash()
    .unwrap_or_else(|_| {
      let full = hash_bytes(format!("{}:{:?}:{:?}", name, version, source).as_bytes());
      ObjectHash(full.0[..OBJ_HASH_PREFIX_LEN].to_string())
    });
    Self {
      name,
      version,
      source,
      hash,
    }
  }

  /// A registry package resolved by name only.
  pub fn registry(name: impl Into<String>) -> Self {
    Self::new(name, None, PackageSource::Registry)
  }

  /// A registry package pinned to a version.
  pub fn versioned(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self::new(name, Some(version.into()), PackageSource::Registry)
  }

  /// A package backed by a local path.
  pub fn path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    Self::new(name, None, PackageSource::Path { path: path.into() })
  }

  /// `name` or `name@version`.
  pub fn identifier(&self) -> String {
    match &self.version {
      Some(version) => format!("{}@{}", self.name, version),
      None => self.name.clone(),
    }
  }
}

impl PartialEq for PackageRef {
  fn eq(&self, other: &Self) -> bool {
    self.hash == other.hash
  }
}

impl Eq for PackageRef {}

impl Hash for PackageRef {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.hash.hash(state);
  }
}

impl fmt::Display for PackageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.identifier())
  }
}
