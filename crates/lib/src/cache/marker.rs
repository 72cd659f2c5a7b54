//! Build completion markers.
//!
//! A finished build directory carries a marker holding the hash of its
//! contents. A directory without a marker, or whose contents no longer match,
//! is not a usable cache entry.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::BUILD_COMPLETE_MARKER;
use crate::util::hash::{ContentHash, DirHashError, hash_directory};

/// Excluded when hashing build outputs: the marker itself and the scratch dir.
const OUTPUT_HASH_EXCLUSIONS: &[&str] = &[BUILD_COMPLETE_MARKER, "tmp"];

const MARKER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMarker {
  pub version: u32,
  pub output_hash: ContentHash,
}

/// Hash `out_dir` and write its marker. Returns the output hash.
pub fn write_marker(out_dir: &Path) -> Result<ContentHash, MarkerError> {
  let output_hash = hash_directory(out_dir, OUTPUT_HASH_EXCLUSIONS)?;
  let marker = BuildMarker {
    version: MARKER_VERSION,
    output_hash: output_hash.clone(),
  };
  let content = serde_json::to_string(&marker).map_err(io::Error::other)?;
  crate::util::fs::write_atomic(&out_dir.join(BUILD_COMPLETE_MARKER), format!("{content}\n").as_bytes())?;
  Ok(output_hash)
}

pub fn read_marker(out_dir: &Path) -> Option<BuildMarker> {
  let content = fs::read_to_string(out_dir.join(BUILD_COMPLETE_MARKER)).ok()?;
  serde_json::from_str(&content).ok()
}

/// Whether `out_dir` holds a complete, unmodified build.
pub fn verify_marker(out_dir: &Path) -> bool {
  let Some(marker) = read_marker(out_dir) else {
    debug!(path = ?out_dir, "no build marker");
    return false;
  };
  if marker.version != MARKER_VERSION {
    return false;
  }

  match hash_directory(out_dir, OUTPUT_HASH_EXCLUSIONS) {
    Ok(current) if current == marker.output_hash => true,
    Ok(current) => {
      warn!(
        path = ?out_dir,
        expected = %marker.output_hash,
        actual = %current,
        "build output modified, will rebuild"
      );
      false
    }
    Err(e) => {
      warn!(path = ?out_dir, error = %e, "failed to hash build output, will rebuild");
      false
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
  #[error("failed to hash build output: {0}")]
  Hash(#[from] DirHashError),

  #[error("failed to write build marker: {0}")]
  Io(#[from] io::Error),
}
