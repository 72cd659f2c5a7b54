mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_lib::config::CONFIG_ENV;
use kiln_lib::consts::DEFAULT_CONFIG_FILE;

use crate::cmd::RunOptions;
use crate::output::{OutputFormat, print_error};

/// kiln - declarative checks and builds for multi-language repositories
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Declaration file
  #[arg(short, long, global = true, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_FILE)]
  config: PathBuf,

  /// Maximum number of nodes running at once (default: KILN_JOBS or the CPU count)
  #[arg(short, long, global = true)]
  jobs: Option<usize>,

  /// Cancel the run after this long, e.g. "90s" or "5m"
  #[arg(long, global = true, value_parser = humantime::parse_duration)]
  timeout: Option<Duration>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run checks (all of them when no target is given)
  Check {
    /// `project` or `project.check`
    targets: Vec<String>,

    /// List declared checks instead of running them
    #[arg(long)]
    list: bool,
  },

  /// Build projects (all of them when none is given)
  Build {
    projects: Vec<String>,
  },

  /// Show the evaluated graph without running anything
  Plan {
    /// `project`, `project.check` or an environment name
    targets: Vec<String>,
  },

  /// Remove cached results, logs, environments and build outputs
  Clean,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let options = RunOptions {
    config: cli.config,
    jobs: cli.jobs,
    timeout: cli.timeout,
    output: cli.output,
    verbose: cli.verbose,
  };

  let result = match cli.command {
    Commands::Check { targets, list } => {
      if list {
        cmd::cmd_list_checks(&options)
      } else {
        cmd::cmd_check(&targets, &options)
      }
    }
    Commands::Build { projects } => cmd::cmd_build(&projects, &options),
    Commands::Plan { targets } => cmd::cmd_plan(&targets, &options),
    Commands::Clean => cmd::cmd_clean(&options),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
