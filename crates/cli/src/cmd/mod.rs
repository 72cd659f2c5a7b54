mod build;
mod check;
mod clean;
mod plan;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use kiln_lib::cache::ResultCache;
use kiln_lib::config::Config;
use kiln_lib::eval::evaluate;
use kiln_lib::execute::{CancelToken, ExecuteConfig, execute};
use kiln_lib::graph::BuildGraph;
use kiln_lib::platform::paths::store_dir;
use kiln_lib::report::Report;
use kiln_lib::store::{LockMode, StoreLock};

use crate::output::{OutputFormat, format_duration, print_json, print_report, print_stat, print_success};

pub use build::cmd_build;
pub use check::{cmd_check, cmd_list_checks};
pub use clean::cmd_clean;
pub use plan::cmd_plan;

/// Global flags shared by every subcommand.
#[derive(Debug, Clone)]
pub struct RunOptions {
  pub config: PathBuf,
  pub jobs: Option<usize>,
  pub timeout: Option<Duration>,
  pub output: OutputFormat,
  pub verbose: bool,
}

/// Load the declaration file and evaluate it into the full graph.
fn load(options: &RunOptions) -> Result<(Config, BuildGraph)> {
  let config = Config::load(&options.config).with_context(|| format!("Failed to load {}", options.config.display()))?;
  let graph =
    evaluate(&config.declarations, &config.store, &config.base_dir).context("Failed to evaluate declarations")?;
  Ok((config, graph))
}

/// Execute `graph` against the store, print the report and map it to an exit code.
fn run_graph(config: Config, graph: &BuildGraph, options: &RunOptions, command: &str) -> Result<ExitCode> {
  let store_root = store_dir();
  let _lock = StoreLock::acquire(&store_root, LockMode::Shared, command).context("Failed to acquire store lock")?;
  let cache = ResultCache::open(&store_root).context("Failed to open result cache")?;

  let mut exec = ExecuteConfig::default();
  if let Some(jobs) = options.jobs {
    exec.parallelism = jobs.max(1);
  }
  exec.timeout = options.timeout;

  let start = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let results = rt.block_on(async {
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling run");
        on_interrupt.cancel();
      }
    });
    execute(graph, Arc::new(config.store), &cache, &exec, &cancel).await
  })?;
  info!(store = %store_root.display(), "run finished");

  let report = Report::new(graph, &results);
  if options.output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, options.verbose);
    println!();
    if report.is_success() {
      print_success(&format!("{} target(s) succeeded", report.targets.len()));
    } else {
      let failed: Vec<&str> = report.failures().map(|t| t.target.as_str()).collect();
      if !failed.is_empty() {
        print_stat("Not passed", &failed.join(", "));
      }
    }
    let counts = report.counts;
    print_stat(
      "Targets",
      &format!(
        "{} passed, {} cached, {} failed, {} error, {} skipped, {} cancelled",
        counts.passed, counts.cached, counts.failed, counts.error, counts.skipped, counts.cancelled
      ),
    );
    if report.timed_out {
      print_stat("Timed out", "yes");
    }
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(ExitCode::from(report.exit_code() as u8))
}
