//! Implementation of the `kiln clean` command.

use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};

use kiln_lib::cache::ResultCache;
use kiln_lib::platform::paths::store_dir;
use kiln_lib::store::{LockMode, StoreLock};

use super::RunOptions;
use crate::output::{format_duration, print_json, print_stat, print_success};

/// Empty the store. Waits for no one: fails if any run holds the lock.
pub fn cmd_clean(options: &RunOptions) -> Result<ExitCode> {
  let start = Instant::now();
  let store_root = store_dir();

  let _lock = StoreLock::acquire(&store_root, LockMode::Exclusive, "clean").context("Failed to acquire store lock")?;
  let cache = ResultCache::open(&store_root).context("Failed to open result cache")?;
  let stats = cache.clean().context("Failed to clean store")?;

  if options.output.is_json() {
    print_json(&stats)?;
  } else {
    print_success("Store cleaned");
    print_stat("Results removed", &stats.records.to_string());
    print_stat("Logs removed", &stats.logs.to_string());
    print_stat("Environments removed", &stats.environments.to_string());
    print_stat("Builds removed", &stats.builds.to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }
  Ok(ExitCode::SUCCESS)
}
