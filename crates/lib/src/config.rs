//! The `kiln.json` declaration file.
//!
//! ```json
//! {
//!   "tools": { "nodejs@20": "/opt/node-20", "jq": "bin/jq" },
//!   "host_tools": false,
//!   "environments": { "shell": { "tools": ["jq"] } },
//!   "projects": {
//!     "web": {
//!       "kind": "npm",
//!       "src": "web",
//!       "node_version": "20",
//!       "environments": { "lint": { "tools": ["eslint"] } },
//!       "checks": [
//!         { "name": "test", "command": "npm test" },
//!         { "name": "lint", "command": "eslint .", "environment": "lint" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Tools are written `name` or `name@version`. Relative paths (tool paths,
//! project sources) are resolved against the directory holding the file.
//! The file is turned into [`Declarations`] through the construction API;
//! nothing downstream sees this format.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::env::Environment;
use crate::package::PackageRef;
use crate::project::{
  Declarations, GoProjectOptions, NpmProjectOptions, Project, ProjectMeta, ValidationError, mk_go_project,
  mk_npm_project, mk_project,
};
use crate::store::LocalStore;

/// Environment variable naming the declaration file.
pub const CONFIG_ENV: &str = "KILN_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid tool '{0}', expected 'name' or 'name@version'")]
  InvalidTool(String),

  #[error("project '{project}': {source}")]
  Project {
    project: String,
    #[source]
    source: ValidationError,
  },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
  #[serde(default)]
  tools: BTreeMap<String, PathBuf>,
  #[serde(default)]
  host_tools: bool,
  #[serde(default)]
  environments: BTreeMap<String, EnvDecl>,
  #[serde(default)]
  projects: BTreeMap<String, ProjectDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnvDecl {
  #[serde(default)]
  tools: Vec<String>,
  #[serde(default)]
  variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ProjectKind {
  #[default]
  Generic,
  Npm,
  Go,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectDecl {
  #[serde(default)]
  kind: ProjectKind,
  description: Option<String>,
  src: PathBuf,
  node_version: Option<String>,
  go_version: Option<String>,
  #[serde(default)]
  dev_tools: Vec<String>,
  #[serde(default)]
  variables: BTreeMap<String, String>,
  #[serde(default)]
  environments: BTreeMap<String, EnvDecl>,
  #[serde(default)]
  checks: Vec<CheckDecl>,
  build: Option<String>,
  #[serde(default)]
  exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckDecl {
  name: String,
  command: String,
  environment: Option<String>,
}

/// A loaded declaration file.
#[derive(Debug, Clone)]
pub struct Config {
  pub declarations: Declarations,
  pub store: LocalStore,
  /// Directory relative sources are resolved against.
  pub base_dir: PathBuf,
}

impl Config {
  /// Read and convert the file at `path`.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let parent = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    let base_dir = std::path::absolute(parent).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content, base_dir).map_err(|e| match e {
      ConfigError::Parse { source, .. } => ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      },
      other => other,
    })
  }

  /// Convert declaration JSON, resolving relative paths against `base_dir`.
  pub fn parse(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
    let base_dir = base_dir.into();
    let file: ConfigFile = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
      path: PathBuf::new(),
      source,
    })?;

    let mut store = LocalStore::new();
    for (identifier, path) in &file.tools {
      parse_tool(identifier)?;
      let path = if path.is_absolute() {
        path.clone()
      } else {
        base_dir.join(path)
      };
      store = store.with_package(identifier.clone(), path);
    }
    if file.host_tools {
      store = store.with_host_path();
    }

    let mut declarations = Declarations::new();
    for (name, decl) in &file.environments {
      declarations = declarations.environment(name.clone(), extend(&Environment::empty(), decl)?);
    }
    for (name, decl) in file.projects {
      let project = build_project(&name, decl)?;
      declarations = declarations.project(name, project);
    }

    debug!(
      projects = declarations.projects.len(),
      environments = declarations.environments.len(),
      "loaded declarations"
    );
    Ok(Self {
      declarations,
      store,
      base_dir,
    })
  }
}

fn parse_tool(spec: &str) -> Result<PackageRef, ConfigError> {
  match spec.split_once('@') {
    None if !spec.is_empty() => Ok(PackageRef::registry(spec)),
    Some((name, version)) if !name.is_empty() && !version.is_empty() => Ok(PackageRef::versioned(name, version)),
    _ => Err(ConfigError::InvalidTool(spec.to_string())),
  }
}

fn extend(base: &Environment, decl: &EnvDecl) -> Result<Environment, ConfigError> {
  let tools = decl
    .tools
    .iter()
    .map(|t| parse_tool(t))
    .collect::<Result<Vec<_>, _>>()?;
  let mut env = base.clone();
  if !tools.is_empty() {
    env = env.with_dev_tools(tools);
  }
  if !decl.variables.is_empty() {
    env = env.with_variables(decl.variables.clone());
  }
  Ok(env)
}

fn invalid(project: &str) -> impl Fn(ValidationError) -> ConfigError + '_ {
  move |source| ConfigError::Project {
    project: project.to_string(),
    source,
  }
}

fn build_project(name: &str, decl: ProjectDecl) -> Result<Project, ConfigError> {
  let description = decl.description.clone().unwrap_or_else(|| name.to_string());
  let mut project = match decl.kind {
    ProjectKind::Generic => mk_project(ProjectMeta::new(description, decl.src.clone()), BTreeMap::new()),
    ProjectKind::Npm => {
      let mut options = NpmProjectOptions::new(description, decl.src.clone());
      if let Some(version) = &decl.node_version {
        options = options.node_version(version.clone());
      }
      mk_npm_project(options).map_err(invalid(name))?
    }
    ProjectKind::Go => {
      let mut options = GoProjectOptions::new(description, decl.src.clone());
      if let Some(version) = &decl.go_version {
        options = options.go_version(version.clone());
      }
      mk_go_project(options).map_err(invalid(name))?
    }
  };

  // Checks capture their environment when added, so settle environments first.
  let own = EnvDecl {
    tools: decl.dev_tools,
    variables: decl.variables,
  };
  project.default_environment = extend(&project.default_environment, &own)?;
  for (env_name, env_decl) in &decl.environments {
    let env = extend(&project.default_environment, env_decl)?;
    project = project.with_environment(env_name.clone(), env);
  }
  if let Some(build) = decl.build {
    project = project.with_build(build);
  }
  for exclusion in decl.exclude {
    project = project.exclude_from_source(exclusion);
  }

  for check in decl.checks {
    project = match &check.environment {
      Some(env) => project.add_check_in(env, check.name, check.command),
      None => project.add_check(check.name, check.command),
    }
    .map_err(invalid(name))?;
  }
  project.validate().map_err(invalid(name))?;
  Ok(project)
}
