//! Project constructors for specific toolchains.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{Project, ProjectMeta, ValidationError, mk_project};
use crate::env::Environment;
use crate::package::PackageRef;

pub const DEFAULT_NODE_VERSION: &str = "18";
pub const SUPPORTED_NODE_VERSIONS: &[&str] = &["14", "16", "18", "20", "22"];

pub const DEFAULT_GO_VERSION: &str = "1.20";
pub const SUPPORTED_GO_VERSIONS: &[&str] = &["1.18", "1.19", "1.20", "1.21", "1.22"];

/// Options for [`mk_npm_project`].
#[derive(Debug, Clone)]
pub struct NpmProjectOptions {
  pub description: String,
  pub src: PathBuf,
  pub node_version: Option<String>,
}

impl NpmProjectOptions {
  pub fn new(description: impl Into<String>, src: impl Into<PathBuf>) -> Self {
    Self {
      description: description.into(),
      src: src.into(),
      node_version: None,
    }
  }

  pub fn node_version(mut self, version: impl Into<String>) -> Self {
    self.node_version = Some(version.into());
    self
  }
}

/// Options for [`mk_go_project`].
#[derive(Debug, Clone)]
pub struct GoProjectOptions {
  pub description: String,
  pub src: PathBuf,
  pub go_version: Option<String>,
}

impl GoProjectOptions {
  pub fn new(description: impl Into<String>, src: impl Into<PathBuf>) -> Self {
    Self {
      description: description.into(),
      src: src.into(),
      go_version: None,
    }
  }

  pub fn go_version(mut self, version: impl Into<String>) -> Self {
    self.go_version = Some(version.into());
    self
  }
}

fn pick_version(
  tool: &'static str,
  requested: Option<&str>,
  default: &'static str,
  supported: &[&'static str],
) -> Result<String, ValidationError> {
  let version = requested.unwrap_or(default);
  if !supported.contains(&version) {
    return Err(ValidationError::UnsupportedVersion {
      tool,
      version: version.to_string(),
      supported: supported.to_vec(),
    });
  }
  Ok(version.to_string())
}

fn check_src(src: &std::path::Path) -> Result<(), ValidationError> {
  if src.as_os_str().is_empty() {
    return Err(ValidationError::InvalidOption {
      option: "src",
      message: "source directory must not be empty".to_string(),
    });
  }
  Ok(())
}

/// A Node.js project built with `npm install`.
///
/// The default environment carries `nodejs` at the requested major version.
/// `node_modules` is left out of the source hash.
pub fn mk_npm_project(options: NpmProjectOptions) -> Result<Project, ValidationError> {
  check_src(&options.src)?;
  let version = pick_version(
    "nodejs",
    options.node_version.as_deref(),
    DEFAULT_NODE_VERSION,
    SUPPORTED_NODE_VERSIONS,
  )?;

  let env = Environment::empty()
    .with_dev_tools([PackageRef::versioned("nodejs", version)])
    .with_variable("npm_config_update_notifier", "false");

  let project = mk_project(
    ProjectMeta::new(options.description, options.src).default_environment(env),
    BTreeMap::new(),
  )
  .with_build(r#"export npm_config_cache="$TMPDIR/npm-cache"; npm install && cp -R node_modules "$out/""#)
  .exclude_from_source("node_modules");

  Ok(project)
}

/// A Go module built with `go build`.
///
/// The default environment carries `go` at the requested version. Binaries
/// land in `$out/bin`.
pub fn mk_go_project(options: GoProjectOptions) -> Result<Project, ValidationError> {
  check_src(&options.src)?;
  let version = pick_version(
    "go",
    options.go_version.as_deref(),
    DEFAULT_GO_VERSION,
    SUPPORTED_GO_VERSIONS,
  )?;

  let env = Environment::empty()
    .with_dev_tools([PackageRef::versioned("go", version)])
    .with_variable("CGO_ENABLED", "0");

  let project = mk_project(
    ProjectMeta::new(options.description, options.src).default_environment(env),
    BTreeMap::new(),
  )
  .with_build(r#"export GOCACHE="$TMPDIR/go-cache" GOPATH="$TMPDIR/go"; go build -o "$out/bin/" ./..."#);

  Ok(project)
}
