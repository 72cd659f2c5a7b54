//! Implementation of the `kiln build` command.

use std::process::ExitCode;

use anyhow::{Context, Result};

use kiln_lib::graph::TargetKind;

use super::{RunOptions, load, run_graph};
use crate::output::print_info;

/// Build the named projects, or every project with a build entry point.
pub fn cmd_build(projects: &[String], options: &RunOptions) -> Result<ExitCode> {
  let (config, graph) = load(options)?;
  let selected = graph
    .select(projects, |t| t.kind == TargetKind::Build)
    .context("Failed to select builds")?;
  if selected.targets().is_empty() {
    print_info("No builds declared");
    return Ok(ExitCode::SUCCESS);
  }
  run_graph(config, &selected, options, "build")
}
