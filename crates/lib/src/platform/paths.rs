use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Environment variable overriding the store root.
pub const STORE_ENV: &str = "KILN_STORE";

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join("AppData").join("Local"))
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Returns the store root holding results, logs, environment handles and build outputs.
///
/// `KILN_STORE` takes precedence over the platform cache directory.
pub fn store_dir() -> PathBuf {
  if let Ok(path) = std::env::var(STORE_ENV)
    && !path.is_empty()
  {
    return PathBuf::from(path);
  }
  cache_dir().join("store")
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn store_env_var_takes_precedence() {
    temp_env::with_vars(
      [("KILN_STORE", Some("/custom/store")), ("XDG_CACHE_HOME", Some("/xdg"))],
      || {
        assert_eq!(store_dir(), PathBuf::from("/custom/store"));
      },
    );
  }

  #[test]
  #[serial]
  fn store_defaults_under_xdg_cache() {
    temp_env::with_vars(
      [("KILN_STORE", None::<&str>), ("XDG_CACHE_HOME", Some("/xdg"))],
      || {
        assert_eq!(store_dir(), PathBuf::from("/xdg").join(APP_NAME).join("store"));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directory() {
    temp_env::with_vars(
      [
        ("KILN_STORE", None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
      },
    );
  }
}
