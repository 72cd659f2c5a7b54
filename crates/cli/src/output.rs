//! CLI output formatting utilities.
//!
//! Colored status lines, duration formatting and JSON printing shared by the
//! subcommands.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use kiln_lib::report::{Report, TargetStatus};
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const CACHED: &str = "↺";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const SKIP: &str = "-";
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One line per target of a finished run.
pub fn print_report(report: &Report, verbose: bool) {
  for target in &report.targets {
    let duration = format_duration(Duration::from_millis(target.duration_ms));
    let (symbol, detail) = match &target.status {
      TargetStatus::Passed => (
        symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
        duration,
      ),
      TargetStatus::Cached => (
        symbols::CACHED.if_supports_color(Stream::Stdout, |s| s.cyan()).to_string(),
        "cached".to_string(),
      ),
      TargetStatus::Failed { exit_code } => (
        symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
        match exit_code {
          Some(code) => format!("exit code {code}"),
          None => "killed by signal".to_string(),
        },
      ),
      TargetStatus::Error { message } => (
        symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
        message.clone(),
      ),
      TargetStatus::Skipped { reason, .. } => (
        symbols::SKIP.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string(),
        format!("skipped, {reason}"),
      ),
      TargetStatus::Cancelled => (
        symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
        "cancelled".to_string(),
      ),
    };
    println!(
      "{} {} {}",
      symbol,
      target.target,
      format!("({detail})").if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
    if let Some(log) = &target.log
      && (verbose || !target.status.is_success())
    {
      println!("    {} {}", symbols::ARROW, log.display());
    }
  }
  for error in &report.errors {
    println!(
      "{} {} {} {}",
      symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
      error.kind,
      truncate_hash(&error.node.0),
      format!("({})", error.message).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
