//! Running one command in an isolated environment.
//!
//! The process starts from an empty environment:
//! - `PATH` is the materialized environment's entries, or a sentinel that
//!   resolves nothing when the environment has no tools
//! - `HOME=/homeless-shelter`
//! - `TMPDIR`, `TMP`, `TEMP`, `TEMPDIR` point at a private directory
//! - `LANG=C`, `LC_ALL=C`, `SOURCE_DATE_EPOCH=315532800`
//! - `out` is set for builds
//!
//! and then receives the environment's own variables, which may override any
//! of the above. Stdout and stderr go to the same log file.

use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::cancel::CancelToken;
use crate::consts::{EMPTY_PATH_SENTINEL, SOURCE_DATE_EPOCH};
use crate::store::MaterializedEnv;

/// Inputs for [`run_command`].
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec<'a> {
  pub command: &'a str,
  pub working_dir: &'a Path,
  pub env: &'a MaterializedEnv,
  pub tmp_dir: &'a Path,
  pub out_dir: Option<&'a Path>,
  pub shell: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
  /// The process exited; `None` when it was killed by a signal.
  Exited(Option<i32>),
  /// Cancellation arrived and the grace period ran out.
  Cancelled,
}

/// Join `entries` into a `PATH` value, or the sentinel when empty.
fn path_value(entries: &[std::path::PathBuf]) -> OsString {
  if entries.is_empty() {
    return OsString::from(EMPTY_PATH_SENTINEL);
  }
  std::env::join_paths(entries).unwrap_or_else(|_| OsString::from(EMPTY_PATH_SENTINEL))
}

/// Build the isolated command without spawning it.
fn isolated_command(spec: &CommandSpec<'_>) -> Command {
  let (shell, shell_args) = get_shell(spec.shell);

  let mut command = Command::new(&shell);
  command
    .args(&shell_args)
    .arg(spec.command)
    .current_dir(spec.working_dir)
    .env_clear()
    .env("PATH", path_value(&spec.env.path_entries))
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", spec.tmp_dir)
    .env("TMP", spec.tmp_dir)
    .env("TEMP", spec.tmp_dir)
    .env("TEMPDIR", spec.tmp_dir)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
    .stdin(Stdio::null())
    .kill_on_drop(true);

  // powershell.exe cannot start without SystemRoot
  #[cfg(windows)]
  if let Some(root) = std::env::var_os("SystemRoot") {
    command.env("SystemRoot", root);
  }

  // Own process group, so cancellation reaches grandchildren too.
  #[cfg(unix)]
  command.process_group(0);

  if let Some(out) = spec.out_dir {
    command.env("out", out);
  }
  for (key, value) in &spec.env.variables {
    command.env(key, value);
  }
  command
}

/// Run `spec.command`, writing combined output to `log`.
///
/// Once `cancel` fires the process has `grace` to exit on its own; after
/// that it is killed and the result is [`CommandOutcome::Cancelled`].
pub async fn run_command(
  spec: &CommandSpec<'_>,
  mut log: File,
  cancel: &CancelToken,
  grace: Duration,
) -> std::io::Result<CommandOutcome> {
  writeln!(log, "$ {}", spec.command)?;
  log.flush()?;

  let stdout = log.try_clone()?;
  let mut command = isolated_command(spec);
  command.stdout(Stdio::from(stdout)).stderr(Stdio::from(log));

  debug!(cmd = %spec.command, working_dir = ?spec.working_dir, "spawning process");
  let mut child = command.spawn()?;

  let status = tokio::select! {
    status = child.wait() => status?,
    _ = cancel.cancelled() => {
      match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
          warn!(cmd = %spec.command, "grace period expired, killing process");
          kill_tree(&mut child).await;
          return Ok(CommandOutcome::Cancelled);
        }
      }
    }
  };

  Ok(CommandOutcome::Exited(status.code()))
}

async fn kill_tree(child: &mut Child) {
  #[cfg(unix)]
  if let Some(pid) = child.id().and_then(|id| rustix::process::Pid::from_raw(id as i32)) {
    let _ = rustix::process::kill_process_group(pid, rustix::process::Signal::KILL);
  }
  if let Err(e) = child.kill().await {
    debug!(error = %e, "process already gone");
  }
}

/// Shell command and arguments for the current platform.
///
/// The default is `/bin/sh` (Unix) or PowerShell (Windows), never the
/// user's login shell, whose profile could add to `PATH`.
pub(crate) fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
