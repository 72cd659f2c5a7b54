//! Run summaries.
//!
//! A [`Report`] folds the per-node results of a run back onto the targets
//! the user asked for. Several targets may share one node; each gets its own
//! entry with the node's outcome. Nodes that no target names, usually
//! environments, are listed under [`Report::errors`] when they could not run
//! or failed, and a skipped target carries the reason its root cause gave.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::execute::{Outcome, RunResults};
use crate::graph::{BuildGraph, NodeId, TargetKind};

/// Per-target status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
  Passed,
  Cached,
  Failed { exit_code: Option<i32> },
  Error { message: String },
  Skipped { cause: NodeId, reason: String },
  Cancelled,
}

impl TargetStatus {
  fn from_outcome(graph: &BuildGraph, results: &RunResults, outcome: Option<&Outcome>) -> Self {
    match outcome {
      Some(Outcome::Success { .. }) => TargetStatus::Passed,
      Some(Outcome::CachedHit { .. }) => TargetStatus::Cached,
      Some(Outcome::Failure { exit_code, .. }) => TargetStatus::Failed { exit_code: *exit_code },
      Some(Outcome::InfrastructureError { message }) => TargetStatus::Error {
        message: message.clone(),
      },
      Some(Outcome::Skipped { cause }) => TargetStatus::Skipped {
        cause: cause.clone(),
        reason: skip_reason(graph, results, cause),
      },
      Some(Outcome::Cancelled) | None => TargetStatus::Cancelled,
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, TargetStatus::Passed | TargetStatus::Cached)
  }

  /// Short lowercase label, as used in text output.
  pub fn label(&self) -> &'static str {
    match self {
      TargetStatus::Passed => "passed",
      TargetStatus::Cached => "cached",
      TargetStatus::Failed { .. } => "failed",
      TargetStatus::Error { .. } => "error",
      TargetStatus::Skipped { .. } => "skipped",
      TargetStatus::Cancelled => "cancelled",
    }
  }
}

/// Why `cause` stopped its dependents, in words.
fn skip_reason(graph: &BuildGraph, results: &RunResults, cause: &NodeId) -> String {
  let kind = graph.node(cause).map_or("node", |n| n.kind.label());
  match results.get(cause).map(|r| &r.outcome) {
    Some(Outcome::InfrastructureError { message }) => format!("{kind} {} could not run: {message}", cause.short()),
    Some(Outcome::Failure {
      exit_code: Some(code), ..
    }) => format!("{kind} {} failed with exit code {code}", cause.short()),
    Some(Outcome::Failure { .. }) => format!("{kind} {} was killed by a signal", cause.short()),
    _ => format!("{kind} {} did not succeed", cause.short()),
  }
}

/// A node without a target of its own that failed or could not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeError {
  pub node: NodeId,
  pub kind: &'static str,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
  /// `project.check` for checks, the name otherwise.
  pub target: String,
  pub kind: TargetKind,
  pub node: NodeId,
  #[serde(flatten)]
  pub status: TargetStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub log: Option<PathBuf>,
  pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Success,
  Failed,
  /// The run was cancelled or timed out before every node finished.
  Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
  pub passed: usize,
  pub cached: usize,
  pub failed: usize,
  pub error: usize,
  pub skipped: usize,
  pub cancelled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
  pub status: RunStatus,
  pub timed_out: bool,
  pub counts: Counts,
  pub targets: Vec<TargetReport>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<NodeError>,
}

impl Report {
  pub fn new(graph: &BuildGraph, results: &RunResults) -> Self {
    let mut counts = Counts::default();
    let targets: Vec<TargetReport> = graph
      .targets()
      .iter()
      .map(|target| {
        let result = results.get(&target.node);
        let outcome = result.map(|r| &r.outcome);
        let status = TargetStatus::from_outcome(graph, results, outcome);
        match status {
          TargetStatus::Passed => counts.passed += 1,
          TargetStatus::Cached => counts.cached += 1,
          TargetStatus::Failed { .. } => counts.failed += 1,
          TargetStatus::Error { .. } => counts.error += 1,
          TargetStatus::Skipped { .. } => counts.skipped += 1,
          TargetStatus::Cancelled => counts.cancelled += 1,
        }
        TargetReport {
          target: target.label(),
          kind: target.kind,
          node: target.node.clone(),
          status,
          log: outcome.and_then(Outcome::log).map(Path::to_path_buf),
          duration_ms: result.map(|r| r.duration.as_millis() as u64).unwrap_or(0),
        }
      })
      .collect();

    let errors = graph
      .nodes()
      .filter(|node| graph.targets_for(&node.id).next().is_none())
      .filter_map(|node| {
        let message = match &results.get(&node.id)?.outcome {
          Outcome::InfrastructureError { message } => message.clone(),
          Outcome::Failure { exit_code, .. } => match exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "killed by a signal".to_string(),
          },
          _ => return None,
        };
        Some(NodeError {
          node: node.id.clone(),
          kind: node.kind.label(),
          message,
        })
      })
      .collect();

    // Untargeted nodes still gate success.
    let status = if results.is_success() && targets.iter().all(|t| t.status.is_success()) {
      RunStatus::Success
    } else if results.timed_out || counts.cancelled > 0 {
      RunStatus::Cancelled
    } else {
      RunStatus::Failed
    };

    Self {
      status,
      timed_out: results.timed_out,
      counts,
      targets,
      errors,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == RunStatus::Success
  }

  /// Process exit status for this report.
  pub fn exit_code(&self) -> i32 {
    if self.is_success() { 0 } else { 1 }
  }

  /// The log written for `target` (`project.check` or a project name).
  pub fn log_for(&self, target: &str) -> Option<&Path> {
    self
      .targets
      .iter()
      .find(|t| t.target == target)
      .and_then(|t| t.log.as_deref())
  }

  pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
    self.targets.iter().filter(|t| !t.status.is_success())
  }
}
