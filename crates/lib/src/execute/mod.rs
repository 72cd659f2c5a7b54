//! Graph execution.
//!
//! [`execute`] runs a [`BuildGraph`] on a bounded pool:
//! - a node starts only once every dependency has a terminal result
//! - the cache is consulted before anything runs
//! - a node that does not succeed skips its transitive dependents, while
//!   unrelated nodes keep going
//! - cancellation (explicit or by timeout) marks unstarted nodes cancelled
//!   and gives running commands a grace period
//!
//! Only successes are written to the cache; failures run again next time.

mod cancel;
pub mod cmd;
mod types;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{BuildOutput, CacheRecord, ResultCache, marker};
use crate::graph::{BuildGraph, BuildNode, NodeId, NodeKind};
use crate::store::{ArtifactStore, MaterializedEnv};
use crate::util::fs::copy_tree;

use cmd::{CommandOutcome, CommandSpec, run_command};

pub use cancel::CancelToken;
pub use types::{Artifact, ExecuteConfig, ExecuteError, JOBS_ENV, NodeResult, Outcome, RunResults};

/// Everything a node task needs, cheap to clone into a spawned task.
#[derive(Clone)]
struct Shared {
  store: Arc<dyn ArtifactStore>,
  cache: ResultCache,
  config: ExecuteConfig,
  cancel: CancelToken,
}

/// Execute every node of `graph`.
///
/// The returned results hold exactly one entry per node. Errors are limited
/// to a malformed graph; failing commands and store errors are outcomes.
pub async fn execute(
  graph: &BuildGraph,
  store: Arc<dyn ArtifactStore>,
  cache: &ResultCache,
  config: &ExecuteConfig,
  cancel: &CancelToken,
) -> Result<RunResults, ExecuteError> {
  let order = graph.topological_order()?;
  info!(
    nodes = order.len(),
    parallelism = config.parallelism,
    "starting execution"
  );

  let timer = config.timeout.map(|timeout| {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(timeout).await;
      warn!(timeout = ?timeout, "run timed out, cancelling");
      cancel.cancel();
    })
  });

  let shared = Shared {
    store,
    cache: cache.clone(),
    config: config.clone(),
    cancel: cancel.clone(),
  };
  let mut run = Scheduler::new(graph, &order);
  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
  let mut join_set: JoinSet<NodeResult> = JoinSet::new();
  let mut in_flight: HashMap<tokio::task::Id, NodeId> = HashMap::new();

  loop {
    while let Some(id) = run.ready.pop_front() {
      let Some(node) = graph.node(&id) else {
        return Err(crate::graph::GraphError::UnknownNode(id).into());
      };

      if cancel.is_cancelled() {
        run.settle(graph, NodeResult::new(id, Outcome::Cancelled, Duration::ZERO));
        continue;
      }

      if let Some(record) = cache.lookup(node) {
        info!(node = %id.short(), kind = node.kind.label(), "cache hit");
        let artifact = cached_artifact(cache, node, record, &mut run.envs);
        run.settle(graph, NodeResult::new(id, Outcome::CachedHit { artifact }, Duration::ZERO));
        continue;
      }

      let env = match &node.kind {
        NodeKind::MaterializeEnvironment { .. } => None,
        NodeKind::RunCheck { environment, .. } | NodeKind::BuildProject { environment, .. } => {
          match run.envs.get(environment) {
            Some(env) => Some(env.clone()),
            None => return Err(ExecuteError::MissingEnvironment(id)),
          }
        }
      };

      let node = node.clone();
      let shared = shared.clone();
      let semaphore = semaphore.clone();
      let handle = join_set.spawn(async move {
        let permit = tokio::select! {
          permit = semaphore.acquire_owned() => permit.ok(),
          _ = shared.cancel.cancelled() => None,
        };
        let Some(_permit) = permit else {
          return NodeResult::new(node.id, Outcome::Cancelled, Duration::ZERO);
        };
        if shared.cancel.is_cancelled() {
          return NodeResult::new(node.id, Outcome::Cancelled, Duration::ZERO);
        }

        let started = Instant::now();
        let outcome = run_node(&shared, &node, env).await;
        NodeResult::new(node.id, outcome, started.elapsed())
      });
      in_flight.insert(handle.id(), id);
    }

    let Some(joined) = join_set.join_next_with_id().await else {
      break;
    };
    let result = match joined {
      Ok((task, result)) => {
        in_flight.remove(&task);
        result
      }
      Err(e) => {
        let Some(id) = in_flight.remove(&e.id()) else {
          error!(error = %e, "untracked node task failed");
          continue;
        };
        error!(node = %id.short(), error = %e, "node task panicked");
        NodeResult::new(
          id,
          Outcome::InfrastructureError {
            message: format!("task failed: {e}"),
          },
          Duration::ZERO,
        )
      }
    };

    if let Outcome::Success {
      artifact: Artifact::Environment(env),
    } = &result.outcome
    {
      run.envs.insert(result.node.clone(), env.clone());
    }
    run.settle(graph, result);
  }

  // Nodes left without a result were waiting behind a node whose task vanished.
  for id in order {
    if !run.results.contains_key(&id) {
      run.results.insert(id.clone(), NodeResult::new(id, Outcome::Cancelled, Duration::ZERO));
    }
  }

  let timed_out = match timer {
    Some(timer) => {
      let fired = timer.is_finished();
      timer.abort();
      fired
    }
    None => false,
  };

  let results = RunResults {
    results: run.results,
    timed_out,
  };
  info!(
    nodes = results.len(),
    success = results.is_success(),
    timed_out,
    "execution complete"
  );
  Ok(results)
}

/// Bookkeeping for ready-queue scheduling.
struct Scheduler {
  ready: VecDeque<NodeId>,
  pending: HashMap<NodeId, usize>,
  results: std::collections::BTreeMap<NodeId, NodeResult>,
  envs: HashMap<NodeId, MaterializedEnv>,
}

impl Scheduler {
  fn new(graph: &BuildGraph, order: &[NodeId]) -> Self {
    let mut ready = VecDeque::new();
    let mut pending = HashMap::new();
    for id in order {
      let deps = graph.dependencies(id).len();
      if deps == 0 {
        ready.push_back(id.clone());
      } else {
        pending.insert(id.clone(), deps);
      }
    }
    Self {
      ready,
      pending,
      results: Default::default(),
      envs: HashMap::new(),
    }
  }

  /// Record a terminal result and release or skip dependents.
  fn settle(&mut self, graph: &BuildGraph, result: NodeResult) {
    let id = result.node.clone();
    let succeeded = result.outcome.is_success();
    let cancelled = matches!(result.outcome, Outcome::Cancelled);
    log_result(&result);
    self.results.insert(id.clone(), result);

    if succeeded {
      for dependent in graph.dependents(&id) {
        if self.results.contains_key(&dependent) {
          continue;
        }
        if let Some(count) = self.pending.get_mut(&dependent) {
          *count -= 1;
          if *count == 0 {
            self.pending.remove(&dependent);
            self.ready.push_back(dependent);
          }
        }
      }
      return;
    }

    for dependent in graph.transitive_dependents(&id) {
      if self.results.contains_key(&dependent) {
        continue;
      }
      self.pending.remove(&dependent);
      let outcome = if cancelled {
        Outcome::Cancelled
      } else {
        warn!(node = %dependent.short(), cause = %id.short(), "skipping node, dependency did not succeed");
        Outcome::Skipped { cause: id.clone() }
      };
      self
        .results
        .insert(dependent.clone(), NodeResult::new(dependent, outcome, Duration::ZERO));
    }
  }
}

fn log_result(result: &NodeResult) {
  let node = result.node.short();
  match &result.outcome {
    Outcome::CachedHit { .. } => debug!(node, "cached"),
    Outcome::Success { .. } => info!(node, duration = ?result.duration, "succeeded"),
    Outcome::Failure { exit_code, log } => {
      error!(node, exit_code = ?exit_code, log = %log.display(), "failed")
    }
    Outcome::InfrastructureError { message } => error!(node, error = %message, "could not run"),
    Outcome::Skipped { .. } => {}
    Outcome::Cancelled => debug!(node, "cancelled"),
  }
}

fn cached_artifact(
  cache: &ResultCache,
  node: &BuildNode,
  record: CacheRecord,
  envs: &mut HashMap<NodeId, MaterializedEnv>,
) -> Artifact {
  match (&node.kind, record.environment, record.output) {
    (NodeKind::MaterializeEnvironment { .. }, Some(env), _) => {
      envs.insert(node.id.clone(), env.clone());
      Artifact::Environment(env)
    }
    (NodeKind::BuildProject { .. }, _, Some(output)) => Artifact::Output(output),
    _ => Artifact::Log {
      path: cache.log_path(&node.id),
    },
  }
}

fn infra(message: impl std::fmt::Display) -> Outcome {
  Outcome::InfrastructureError {
    message: message.to_string(),
  }
}

async fn run_node(shared: &Shared, node: &BuildNode, env: Option<MaterializedEnv>) -> Outcome {
  debug!(node = %node.id.short(), kind = node.kind.label(), "running node");
  match (&node.kind, env) {
    (NodeKind::MaterializeEnvironment { closure }, _) => {
      let store = shared.store.clone();
      let closure = closure.clone();
      let dest = shared.cache.env_dir(&node.id);
      let realized = tokio::task::spawn_blocking(move || store.realize(&closure, &dest)).await;
      match realized {
        Ok(Ok(env)) => {
          let record = CacheRecord::new(node, Duration::ZERO).with_environment(env.clone());
          if let Err(e) = shared.cache.insert(&record) {
            return infra(e);
          }
          Outcome::Success {
            artifact: Artifact::Environment(env),
          }
        }
        Ok(Err(e)) => infra(e),
        Err(e) => infra(format!("realize task failed: {e}")),
      }
    }
    (NodeKind::RunCheck {
      command, working_dir, ..
    }, Some(env)) => run_check(shared, node, command, working_dir, &env).await,
    (
      NodeKind::BuildProject {
        command,
        source_root,
        exclusions,
        ..
      },
      Some(env),
    ) => run_build(shared, node, command, source_root, exclusions, &env).await,
    (_, None) => infra("environment was not materialized"),
  }
}

async fn run_check(
  shared: &Shared,
  node: &BuildNode,
  command: &str,
  working_dir: &std::path::Path,
  env: &MaterializedEnv,
) -> Outcome {
  if !working_dir.is_dir() {
    return infra(format!("working directory {} does not exist", working_dir.display()));
  }
  let scratch = match tempfile::tempdir() {
    Ok(dir) => dir,
    Err(e) => return infra(format!("failed to create scratch directory: {e}")),
  };
  let log = match shared.cache.log_tempfile() {
    Ok(log) => log,
    Err(e) => return infra(e),
  };
  let handle = match log.as_file().try_clone() {
    Ok(file) => file,
    Err(e) => return infra(format!("failed to open log: {e}")),
  };

  let started = Instant::now();
  let spec = CommandSpec {
    command,
    working_dir,
    env,
    tmp_dir: scratch.path(),
    out_dir: None,
    shell: shared.config.shell.as_deref(),
  };
  let outcome = match run_command(&spec, handle, &shared.cancel, shared.config.grace_period).await {
    Ok(outcome) => outcome,
    Err(e) => return infra(format!("failed to run command: {e}")),
  };

  let log = match shared.cache.persist_log(log, &node.id) {
    Ok(path) => path,
    Err(e) => return infra(e),
  };

  match outcome {
    CommandOutcome::Exited(Some(0)) => {
      if let Err(e) = shared.cache.insert(&CacheRecord::new(node, started.elapsed())) {
        return infra(e);
      }
      Outcome::Success {
        artifact: Artifact::Log { path: log },
      }
    }
    CommandOutcome::Exited(exit_code) => Outcome::Failure { exit_code, log },
    CommandOutcome::Cancelled => Outcome::Cancelled,
  }
}

async fn run_build(
  shared: &Shared,
  node: &BuildNode,
  command: &str,
  source_root: &std::path::Path,
  exclusions: &[String],
  env: &MaterializedEnv,
) -> Outcome {
  let scratch = match tempfile::tempdir() {
    Ok(dir) => dir,
    Err(e) => return infra(format!("failed to create scratch directory: {e}")),
  };
  let build_root = shared.cache.build_dir(&node.id);
  let staging = match build_root
    .parent()
    .ok_or_else(|| std::io::Error::other("build directory has no parent"))
    .and_then(|parent| tempfile::Builder::new().prefix(".staging-").tempdir_in(parent))
  {
    Ok(dir) => dir,
    Err(e) => return infra(format!("failed to create output directory: {e}")),
  };

  let src = scratch.path().join("src");
  let tmp = scratch.path().join("tmp");
  let copy = {
    let (from, to, tmp) = (source_root.to_path_buf(), src.clone(), tmp.clone());
    let exclusions = exclusions.to_vec();
    tokio::task::spawn_blocking(move || {
      let excluded: Vec<&str> = exclusions.iter().map(String::as_str).collect();
      copy_tree(&from, &to, &excluded)?;
      std::fs::create_dir_all(&tmp)
    })
    .await
  };
  match copy {
    Ok(Ok(())) => {}
    Ok(Err(e)) => return infra(format!("failed to copy source tree: {e}")),
    Err(e) => return infra(format!("copy task failed: {e}")),
  }

  let log = match shared.cache.log_tempfile() {
    Ok(log) => log,
    Err(e) => return infra(e),
  };
  let handle = match log.as_file().try_clone() {
    Ok(file) => file,
    Err(e) => return infra(format!("failed to open log: {e}")),
  };

  let started = Instant::now();
  let spec = CommandSpec {
    command,
    working_dir: &src,
    env,
    tmp_dir: &tmp,
    out_dir: Some(staging.path()),
    shell: shared.config.shell.as_deref(),
  };
  let outcome = match run_command(&spec, handle, &shared.cancel, shared.config.grace_period).await {
    Ok(outcome) => outcome,
    Err(e) => return infra(format!("failed to run command: {e}")),
  };
  let log = match shared.cache.persist_log(log, &node.id) {
    Ok(path) => path,
    Err(e) => return infra(e),
  };

  match outcome {
    CommandOutcome::Exited(Some(0)) => {}
    CommandOutcome::Exited(exit_code) => return Outcome::Failure { exit_code, log },
    CommandOutcome::Cancelled => return Outcome::Cancelled,
  }

  let mut hash = match marker::write_marker(staging.path()) {
    Ok(hash) => hash,
    Err(e) => return infra(e),
  };
  if build_root.exists() {
    if marker::verify_marker(&build_root) {
      debug!(node = %node.id.short(), "another run already published this build");
      if let Some(existing) = marker::read_marker(&build_root) {
        hash = existing.output_hash;
      }
    } else if let Err(e) = std::fs::remove_dir_all(&build_root) {
      return infra(format!("failed to replace stale build output: {e}"));
    }
  }
  if !build_root.exists()
    && let Err(e) = std::fs::rename(staging.path(), &build_root)
  {
    return infra(format!("failed to publish build output: {e}"));
  }

  let output = BuildOutput {
    path: build_root,
    hash,
  };
  let record = CacheRecord::new(node, started.elapsed()).with_output(output.clone());
  if let Err(e) = shared.cache.insert(&record) {
    return infra(e);
  }
  Outcome::Success {
    artifact: Artifact::Output(output),
  }
}
