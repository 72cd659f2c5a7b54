//! Implementation of the `kiln plan` command.
//!
//! Evaluates the declarations and shows the nodes a run would execute, in
//! waves of nodes that may run concurrently, with their cache state.

use std::process::ExitCode;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use kiln_lib::cache::ResultCache;
use kiln_lib::graph::{BuildNode, Plan};
use kiln_lib::platform::paths::store_dir;

use super::{RunOptions, load};
use crate::output::{print_json, print_stat, symbols, truncate_hash};

#[derive(Serialize)]
struct PlanOutput {
  #[serde(flatten)]
  plan: Plan,
  waves: Vec<Vec<String>>,
  cached: Vec<String>,
}

pub fn cmd_plan(targets: &[String], options: &RunOptions) -> Result<ExitCode> {
  let (_config, graph) = load(options)?;
  let graph = graph.select(targets, |_| true).context("Failed to select targets")?;
  let waves = graph.waves().context("Failed to order graph")?;

  // No store yet means nothing is cached.
  let store_root = store_dir();
  let cache = store_root.exists().then(|| ResultCache::open(&store_root).ok()).flatten();
  let is_cached = |node: &BuildNode| cache.as_ref().is_some_and(|c| c.lookup(node).is_some());

  if options.output.is_json() {
    let cached = graph.nodes().filter(|n| is_cached(n)).map(|n| n.id.0.clone()).collect();
    print_json(&PlanOutput {
      plan: graph.plan(),
      waves: waves
        .iter()
        .map(|wave| wave.iter().map(|id| id.0.clone()).collect())
        .collect(),
      cached,
    })?;
    return Ok(ExitCode::SUCCESS);
  }

  for (i, wave) in waves.iter().enumerate() {
    println!("Wave {}:", i + 1);
    for id in wave {
      let Some(node) = graph.node(id) else { continue };
      let names: Vec<String> = graph.targets_for(id).map(|t| t.label()).collect();
      let state = if is_cached(node) { "cached" } else { "pending" };
      println!(
        "  {} {} {} {}",
        symbols::INFO,
        truncate_hash(&id.0),
        node.kind.label(),
        format!("[{state}]").if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
      if !names.is_empty() {
        println!("      {} {}", symbols::ARROW, names.join(", "));
      }
    }
  }
  println!();
  print_stat("Nodes", &graph.len().to_string());
  print_stat("Targets", &graph.targets().len().to_string());
  Ok(ExitCode::SUCCESS)
}
