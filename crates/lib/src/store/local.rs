use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{ArtifactStore, MaterializedEnv, ResolvedClosure, ResolvedPackage, StoreError};
use crate::package::{PackageRef, PackageSource};

/// An artifact store backed by the local filesystem.
///
/// Registry packages are looked up by `name@version`, then by bare `name`
/// when the reference carries no version. With a host fallback configured,
/// registry packages not in the table are searched for as executables on the
/// given directories (usually the caller's `PATH`). Versions of host tools are
/// not verified.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
  registry: BTreeMap<String, PathBuf>,
  host_path: Option<Vec<PathBuf>>,
}

impl LocalStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Map an identifier (`name` or `name@version`) to a path.
  pub fn with_package(mut self, identifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    self.registry.insert(identifier.into(), path.into());
    self
  }

  /// Search these directories for unregistered tools.
  pub fn with_host_fallback(mut self, dirs: Vec<PathBuf>) -> Self {
    self.host_path = Some(dirs);
    self
  }

  /// Search the current process's `PATH` for unregistered tools.
  pub fn with_host_path(self) -> Self {
    let dirs = std::env::var_os("PATH")
      .map(|p| std::env::split_paths(&p).collect())
      .unwrap_or_default();
    self.with_host_fallback(dirs)
  }

  fn lookup_host(&self, name: &str) -> Option<PathBuf> {
    let dirs = self.host_path.as_ref()?;
    dirs.iter().find_map(|dir| {
      executable_names(name)
        .into_iter()
        .map(|candidate| dir.join(candidate))
        .find(|p| p.is_file())
    })
  }
}

#[cfg(windows)]
fn executable_names(name: &str) -> Vec<String> {
  vec![format!("{name}.exe"), format!("{name}.cmd"), name.to_string()]
}

#[cfg(not(windows))]
fn executable_names(name: &str) -> Vec<String> {
  vec![name.to_string()]
}

fn not_found(package: &PackageRef, reason: impl Into<String>) -> StoreError {
  StoreError::NotFound {
    identifier: package.identifier(),
    reason: reason.into(),
  }
}

impl ArtifactStore for LocalStore {
  fn resolve(&self, package: &PackageRef) -> Result<ResolvedPackage, StoreError> {
    let local_path = match &package.source {
      PackageSource::Path { path } => {
        if !path.exists() {
          return Err(not_found(package, format!("{} does not exist", path.display())));
        }
        path.clone()
      }
      PackageSource::CheckOutput { project, check } => {
        return Err(StoreError::Unsupported {
          identifier: package.identifier(),
          reason: format!("'{project}.{check}' is a check and produces no output"),
        });
      }
      PackageSource::Registry => {
        if let Some(path) = self.registry.get(&package.identifier()) {
          path.clone()
        } else if package.version.is_none()
          && let Some(path) = self.registry.get(&package.name)
        {
          path.clone()
        } else if let Some(path) = self.lookup_host(&package.name) {
          if package.version.is_some() {
            warn!(
              package = %package.identifier(),
              path = %path.display(),
              "using host tool without version verification"
            );
          }
          path
        } else {
          return Err(not_found(package, "not in the tool registry"));
        }
      }
    };

    debug!(package = %package.identifier(), path = %local_path.display(), "resolved package");
    Ok(ResolvedPackage {
      package: package.clone(),
      local_path,
    })
  }

  fn realize(&self, closure: &ResolvedClosure, dest: &Path) -> Result<MaterializedEnv, StoreError> {
    let link_dir = dest.join("bin");
    let mut path_entries = Vec::new();
    let mut linked_files = false;

    for resolved in closure.packages.values() {
      let path = &resolved.local_path;
      if !path.exists() {
        return Err(not_found(
          &resolved.package,
          format!("{} disappeared after resolution", path.display()),
        ));
      }

      if path.is_file() {
        fs::create_dir_all(&link_dir).map_err(io_err(&link_dir))?;
        link_executable(path, &link_dir).map_err(io_err(path))?;
        linked_files = true;
      } else {
        let bin = path.join("bin");
        let entry = if bin.is_dir() { bin } else { path.clone() };
        if !path_entries.contains(&entry) {
          path_entries.push(entry);
        }
      }
    }

    if linked_files {
      path_entries.insert(0, link_dir);
    }

    Ok(MaterializedEnv {
      path_entries,
      variables: closure.variables.clone(),
    })
  }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
  let path = path.to_path_buf();
  move |source| StoreError::Io { path, source }
}

fn link_executable(file: &Path, link_dir: &Path) -> std::io::Result<()> {
  let Some(name) = file.file_name() else {
    return Err(std::io::Error::new(
      std::io::ErrorKind::InvalidInput,
      "executable path has no file name",
    ));
  };
  let file = std::path::absolute(file)?;
  let link = link_dir.join(name);
  if link.symlink_metadata().is_ok() {
    fs::remove_file(&link)?;
  }

  #[cfg(unix)]
  {
    std::os::unix::fs::symlink(file, &link)
  }

  #[cfg(not(unix))]
  {
    fs::copy(file, &link).map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn closure_of(packages: Vec<ResolvedPackage>) -> ResolvedClosure {
    ResolvedClosure {
      packages: packages.into_iter().map(|p| (p.package.name.clone(), p)).collect(),
      variables: BTreeMap::from([("CI".to_string(), "1".to_string())]),
    }
  }

  #[test]
  fn registry_prefers_versioned_entry() {
    let store = LocalStore::new()
      .with_package("nodejs@18", "/opt/node18")
      .with_package("nodejs", "/opt/node");

    let resolved = store.resolve(&PackageRef::versioned("nodejs", "18")).unwrap();
    assert_eq!(resolved.local_path, PathBuf::from("/opt/node18"));

    let resolved = store.resolve(&PackageRef::registry("nodejs")).unwrap();
    assert_eq!(resolved.local_path, PathBuf::from("/opt/node"));
  }

  #[test]
  fn versioned_ref_does_not_match_bare_entry() {
    let store = LocalStore::new().with_package("nodejs", "/opt/node");
    let err = store.resolve(&PackageRef::versioned("nodejs", "20")).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { ref identifier, .. } if identifier == "nodejs@20"));
  }

  #[test]
  fn path_source_must_exist() {
    let temp = tempdir().unwrap();
    let store = LocalStore::new();

    assert!(store.resolve(&PackageRef::path("tool", temp.path())).is_ok());
    assert!(matches!(
      store.resolve(&PackageRef::path("tool", temp.path().join("missing"))),
      Err(StoreError::NotFound { .. })
    ));
  }

  #[test]
  fn check_output_is_unsupported() {
    let package = PackageRef::new(
      "lint",
      None,
      PackageSource::CheckOutput {
        project: "frontend".to_string(),
        check: "lint".to_string(),
      },
    );
    assert!(matches!(
      LocalStore::new().resolve(&package),
      Err(StoreError::Unsupported { .. })
    ));
  }

  #[test]
  fn host_fallback_finds_executables() {
    let temp = tempdir().unwrap();
    let name = executable_names("mytool").remove(0);
    fs::write(temp.path().join(&name), "").unwrap();

    let store = LocalStore::new().with_host_fallback(vec![temp.path().to_path_buf()]);
    let resolved = store.resolve(&PackageRef::registry("mytool")).unwrap();
    assert_eq!(resolved.local_path, temp.path().join(name));

    assert!(LocalStore::new().resolve(&PackageRef::registry("mytool")).is_err());
  }

  #[test]
  fn realize_puts_prefix_bin_on_path() {
    let prefix = tempdir().unwrap();
    fs::create_dir(prefix.path().join("bin")).unwrap();
    let dest = tempdir().unwrap();

    let store = LocalStore::new().with_package("go", prefix.path());
    let go = store.resolve(&PackageRef::registry("go")).unwrap();
    let env = store.realize(&closure_of(vec![go]), dest.path()).unwrap();

    assert_eq!(env.path_entries, vec![prefix.path().join("bin")]);
    assert_eq!(env.variables["CI"], "1");
    assert!(env.is_intact());
  }

  #[test]
  fn realize_links_single_files_into_dest() {
    let tools = tempdir().unwrap();
    let deno = tools.path().join("deno");
    fs::write(&deno, "#!/bin/sh").unwrap();
    let dest = tempdir().unwrap();

    let store = LocalStore::new();
    let resolved = store.resolve(&PackageRef::path("deno", &deno)).unwrap();
    let env = store.realize(&closure_of(vec![resolved]), dest.path()).unwrap();

    assert_eq!(env.path_entries, vec![dest.path().join("bin")]);
    assert!(dest.path().join("bin/deno").exists());
  }

  #[test]
  fn realize_fails_when_resolved_path_vanished() {
    let tools = tempdir().unwrap();
    let store = LocalStore::new();
    let resolved = store.resolve(&PackageRef::path("gone", tools.path())).unwrap();
    let path = tools.path().to_path_buf();
    drop(tools);

    let dest = tempdir().unwrap();
    let err = store.realize(&closure_of(vec![resolved]), dest.path()).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }), "{path:?}: {err}");
  }
}
