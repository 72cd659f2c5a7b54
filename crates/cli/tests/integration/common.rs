//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the declaration file,
/// project sources under `src/`, and a private store outside the sources.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  pub fn new(config: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("kiln.json");
    std::fs::write(&config_path, config).unwrap();
    Self { temp, config_path }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Replace the declaration file.
  pub fn write_config(&self, config: &str) {
    std::fs::write(&self.config_path, config).unwrap();
  }

  /// Store path (isolated per test).
  pub fn store_path(&self) -> PathBuf {
    let p = self.temp.path().join("store");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// Runs in the temp directory with `KILN_STORE` pointing at the isolated
  /// store and host overrides (`KILN_CONFIG`, `KILN_JOBS`) removed.
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.current_dir(self.temp.path());
    cmd.env("KILN_STORE", self.store_path());
    cmd.env_remove("KILN_CONFIG");
    cmd.env_remove("KILN_JOBS");
    cmd
  }

  /// Run `kiln -o json <args>` and parse the report.
  pub fn json_report(&self, args: &[&str]) -> (i32, serde_json::Value) {
    let output = self.kiln_cmd().args(["-o", "json"]).args(args).output().unwrap();
    let report = serde_json::from_slice(&output.stdout)
      .unwrap_or_else(|e| panic!("invalid JSON ({e}): {}", String::from_utf8_lossy(&output.stdout)));
    (output.status.code().unwrap_or(-1), report)
  }
}

/// The report entry for `target`.
pub fn target<'a>(report: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
  report["targets"]
    .as_array()
    .unwrap()
    .iter()
    .find(|t| t["target"] == name)
    .unwrap_or_else(|| panic!("no target {name} in {report}"))
}
