//! Types for graph execution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::BuildOutput;
use crate::graph::{GraphError, NodeId};
use crate::store::MaterializedEnv;

/// Environment variable overriding the default parallelism.
pub const JOBS_ENV: &str = "KILN_JOBS";

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Errors that abort a run before any node is scheduled.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("node {0} has no materialized environment")]
  MissingEnvironment(NodeId),
}

/// What a successful node left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
  Environment(MaterializedEnv),
  Log { path: PathBuf },
  Output(BuildOutput),
}

/// Terminal outcome of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
  /// A still-valid result from an earlier run; nothing was executed.
  CachedHit { artifact: Artifact },
  Success { artifact: Artifact },
  /// The command ran and exited non-zero (or was killed by a signal).
  Failure { exit_code: Option<i32>, log: PathBuf },
  /// The node could not be run at all.
  InfrastructureError { message: String },
  /// Not run because `cause` did not succeed.
  Skipped { cause: NodeId },
  Cancelled,
}

impl Outcome {
  pub fn is_success(&self) -> bool {
    matches!(self, Outcome::CachedHit { .. } | Outcome::Success { .. })
  }

  /// The log of a check or build, when one was written.
  pub fn log(&self) -> Option<&Path> {
    match self {
      Outcome::CachedHit {
        artifact: Artifact::Log { path },
      }
      | Outcome::Success {
        artifact: Artifact::Log { path },
      } => Some(path),
      Outcome::Failure { log, .. } => Some(log),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResult {
  pub node: NodeId,
  pub outcome: Outcome,
  pub duration: Duration,
}

impl NodeResult {
  pub fn new(node: NodeId, outcome: Outcome, duration: Duration) -> Self {
    Self {
      node,
      outcome,
      duration,
    }
  }
}

/// Results of one run, one per node of the executed graph.
#[derive(Debug, Clone, Default)]
pub struct RunResults {
  pub results: BTreeMap<NodeId, NodeResult>,
  /// Whether the run hit `ExecuteConfig::timeout`.
  pub timed_out: bool,
}

impl RunResults {
  pub fn get(&self, id: &NodeId) -> Option<&NodeResult> {
    self.results.get(id)
  }

  pub fn is_success(&self) -> bool {
    self.results.values().all(|r| r.outcome.is_success())
  }

  pub fn len(&self) -> usize {
    self.results.len()
  }

  pub fn is_empty(&self) -> bool {
    self.results.is_empty()
  }
}

/// Configuration for graph execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of nodes running at once.
  pub parallelism: usize,

  /// Shell used to run commands; `/bin/sh` (Unix) or PowerShell (Windows)
  /// when unset.
  pub shell: Option<String>,

  /// Run-wide deadline; reaching it cancels the run.
  pub timeout: Option<Duration>,

  /// How long in-flight commands may keep running after cancellation.
  pub grace_period: Duration,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: default_parallelism(),
      shell: None,
      timeout: None,
      grace_period: DEFAULT_GRACE_PERIOD,
    }
  }
}

/// `KILN_JOBS` when set to a positive number, else the available CPUs.
fn default_parallelism() -> usize {
  std::env::var(JOBS_ENV)
    .ok()
    .and_then(|v| v.trim().parse::<usize>().ok())
    .filter(|n| *n > 0)
    .unwrap_or_else(|| std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4))
}
