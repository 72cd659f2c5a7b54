//! Implementation of the `kiln check` command.

use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Serialize;

use kiln_lib::graph::TargetKind;

use super::{RunOptions, load, run_graph};
use crate::output::{print_info, print_json};

/// Run the checks matching `targets`, or every check when empty.
///
/// Builds and standalone environments are never selected here.
pub fn cmd_check(targets: &[String], options: &RunOptions) -> Result<ExitCode> {
  let (config, graph) = load(options)?;
  let selected = graph
    .select(targets, |t| t.kind == TargetKind::Check)
    .context("Failed to select checks")?;
  if selected.targets().is_empty() {
    print_info("No checks declared");
    return Ok(ExitCode::SUCCESS);
  }
  run_graph(config, &selected, options, "check")
}

#[derive(Serialize)]
struct ListedCheck<'a> {
  target: String,
  command: &'a str,
}

/// Print every declared check without evaluating anything.
pub fn cmd_list_checks(options: &RunOptions) -> Result<ExitCode> {
  let config = kiln_lib::config::Config::load(&options.config)
    .with_context(|| format!("Failed to load {}", options.config.display()))?;
  let checks: Vec<ListedCheck> = config
    .declarations
    .list_checks()
    .into_iter()
    .map(|(project, check)| ListedCheck {
      target: format!("{project}.{}", check.name),
      command: &check.command,
    })
    .collect();

  if options.output.is_json() {
    print_json(&checks)?;
  } else if checks.is_empty() {
    print_info("No checks declared");
  } else {
    let width = checks.iter().map(|c| c.target.len()).max().unwrap_or(0);
    for check in &checks {
      println!("{:width$}  {}", check.target, check.command);
    }
  }
  Ok(ExitCode::SUCCESS)
}
