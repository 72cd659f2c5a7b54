//! Persistent result cache keyed by node id.
//!
//! # Layout
//!
//! ```text
//! <store>/
//! ├── results/<id>.json   # one record per successful node
//! ├── logs/<id>.log       # combined stdout and stderr of the last run
//! ├── envs/<id>/          # materialized environment files
//! └── build/<id>/         # build outputs, with a completion marker
//! ```
//!
//! Only successes are recorded. A record is a hit only while the artifact it
//! vouches for is still present: the log for a check, the `PATH` entries for
//! an environment and a verified output directory for a build.

pub mod marker;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::graph::{BuildNode, NodeId, NodeKind};
use crate::store::MaterializedEnv;
use crate::util::fs::write_atomic;
use crate::util::hash::ContentHash;

const RECORD_VERSION: u32 = 1;

const RESULTS_DIR: &str = "results";
const LOGS_DIR: &str = "logs";
const ENVS_DIR: &str = "envs";
const BUILD_DIR: &str = "build";

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache i/o error at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to encode cache record: {0}")]
  Encode(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError {
  let path = path.to_path_buf();
  move |source| CacheError::Io { path, source }
}

/// Where a build's outputs landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
  pub path: PathBuf,
  pub hash: ContentHash,
}

/// A successful node outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
  pub version: u32,
  pub node: NodeId,
  pub kind: String,
  pub duration_ms: u64,
  pub finished_at_unix: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub environment: Option<MaterializedEnv>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<BuildOutput>,
}

impl CacheRecord {
  pub fn new(node: &BuildNode, duration: Duration) -> Self {
    Self {
      version: RECORD_VERSION,
      node: node.id.clone(),
      kind: node.kind.label().to_string(),
      duration_ms: duration.as_millis() as u64,
      finished_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      environment: None,
      output: None,
    }
  }

  pub fn with_environment(mut self, env: MaterializedEnv) -> Self {
    self.environment = Some(env);
    self
  }

  pub fn with_output(mut self, output: BuildOutput) -> Self {
    self.output = Some(output);
    self
  }
}

/// Entries removed by [`ResultCache::clean`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanStats {
  pub records: usize,
  pub logs: usize,
  pub environments: usize,
  pub builds: usize,
}

impl CleanStats {
  pub fn total(&self) -> usize {
    self.records + self.logs + self.environments + self.builds
  }
}

#[derive(Debug, Clone)]
pub struct ResultCache {
  root: PathBuf,
}

impl ResultCache {
  /// Open (and create) the cache under `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
    let root = root.into();
    for dir in [RESULTS_DIR, LOGS_DIR, ENVS_DIR, BUILD_DIR] {
      let path = root.join(dir);
      fs::create_dir_all(&path).map_err(io_err(&path))?;
    }
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn record_path(&self, id: &NodeId) -> PathBuf {
    self.root.join(RESULTS_DIR).join(format!("{}.json", id.0))
  }

  pub fn log_path(&self, id: &NodeId) -> PathBuf {
    self.root.join(LOGS_DIR).join(format!("{}.log", id.0))
  }

  pub fn env_dir(&self, id: &NodeId) -> PathBuf {
    self.root.join(ENVS_DIR).join(&id.0)
  }

  pub fn build_dir(&self, id: &NodeId) -> PathBuf {
    self.root.join(BUILD_DIR).join(&id.0)
  }

  /// A fresh log file in the logs directory, to be moved into place with
  /// [`ResultCache::persist_log`].
  pub fn log_tempfile(&self) -> Result<NamedTempFile, CacheError> {
    let dir = self.root.join(LOGS_DIR);
    NamedTempFile::new_in(&dir).map_err(io_err(&dir))
  }

  /// Atomically publish a finished log as `logs/<id>.log`.
  pub fn persist_log(&self, log: NamedTempFile, id: &NodeId) -> Result<PathBuf, CacheError> {
    let path = self.log_path(id);
    log.persist(&path).map_err(|e| CacheError::Io {
      path: path.clone(),
      source: e.error,
    })?;
    Ok(path)
  }

  /// Look up a usable record for `node`.
  ///
  /// Stale records (artifact gone or modified) are reported as misses.
  pub fn lookup(&self, node: &BuildNode) -> Option<CacheRecord> {
    let path = self.record_path(&node.id);
    let content = fs::read_to_string(&path).ok()?;
    let record: CacheRecord = match serde_json::from_str(&content) {
      Ok(record) => record,
      Err(e) => {
        warn!(node = %node.id.short(), error = %e, "unreadable cache record, ignoring");
        return None;
      }
    };
    if record.version != RECORD_VERSION || record.node != node.id {
      return None;
    }

    let intact = match &node.kind {
      NodeKind::RunCheck { .. } => self.log_path(&node.id).is_file(),
      NodeKind::MaterializeEnvironment { .. } => record.environment.as_ref().is_some_and(MaterializedEnv::is_intact),
      NodeKind::BuildProject { .. } => record
        .output
        .as_ref()
        .is_some_and(|out| out.path.is_dir() && marker::verify_marker(&out.path)),
    };
    if !intact {
      debug!(node = %node.id.short(), "cache record is stale");
      return None;
    }
    Some(record)
  }

  /// Record a success. A no-op returning `false` when a record exists.
  pub fn insert(&self, record: &CacheRecord) -> Result<bool, CacheError> {
    let path = self.record_path(&record.node);
    if path.exists() {
      return Ok(false);
    }
    let bytes = serde_json::to_vec_pretty(record)?;
    write_atomic(&path, &bytes).map_err(io_err(&path))?;
    Ok(true)
  }

  /// Remove every record, log, environment and build output.
  pub fn clean(&self) -> Result<CleanStats, CacheError> {
    let stats = CleanStats {
      records: clear_dir(&self.root.join(RESULTS_DIR))?,
      logs: clear_dir(&self.root.join(LOGS_DIR))?,
      environments: clear_dir(&self.root.join(ENVS_DIR))?,
      builds: clear_dir(&self.root.join(BUILD_DIR))?,
    };
    debug!(removed = stats.total(), "cleaned cache");
    Ok(stats)
  }
}

fn clear_dir(dir: &Path) -> Result<usize, CacheError> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
    Err(e) => return Err(io_err(dir)(e)),
  };

  let mut removed = 0;
  for entry in entries {
    let path = entry.map_err(io_err(dir))?.path();
    let result = if path.is_dir() && !path.is_symlink() {
      fs::remove_dir_all(&path)
    } else {
      fs::remove_file(&path)
    };
    result.map_err(io_err(&path))?;
    removed += 1;
  }
  Ok(removed)
}
