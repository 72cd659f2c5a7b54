//! Projects, checks and the declaration tree.
//!
//! A [`Project`] pairs a source tree with a default [`Environment`], named
//! sub-environments, an ordered list of [`Check`]s and an optional build
//! entry point. Projects are assembled with a by-value builder API:
//!
//! ```ignore
//! let frontend = mk_npm_project(NpmProjectOptions::new("my frontend", "./frontend").node_version("18"))?
//!   .add_check("test", "npm test")?;
//! ```
//!
//! [`Declarations`] is the explicit forest handed to the evaluator; there is
//! no process-wide registry of projects.

mod kinds;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DEFAULT_SOURCE_EXCLUSIONS;
use crate::env::Environment;

pub use kinds::{
  DEFAULT_GO_VERSION, DEFAULT_NODE_VERSION, GoProjectOptions, NpmProjectOptions, SUPPORTED_GO_VERSIONS,
  SUPPORTED_NODE_VERSIONS, mk_go_project, mk_npm_project,
};

/// Errors in declarations, detected before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("project '{project}' declares check '{check}' more than once")]
  DuplicateCheck { project: String, check: String },

  #[error("check '{check}' in project '{project}' has an empty command")]
  EmptyCommand { project: String, check: String },

  #[error("invalid {kind} name '{name}': names must be non-empty and may not contain '.' or whitespace")]
  InvalidName { kind: &'static str, name: String },

  #[error("project '{project}' has no environment named '{environment}'")]
  UnknownEnvironment { project: String, environment: String },

  /// `owner` is `project.check`, a project name (its default environment or
  /// build), `project:environment`, or a standalone environment name.
  #[error("'{owner}' uses the output of check '{referenced}' as a tool; checks produce no artifacts")]
  CheckAsInput { owner: String, referenced: String },

  #[error("check '{check}' in project '{project}' requires its own output in its environment")]
  SelfReferentialCheck { project: String, check: String },

  #[error("check '{check}' in project '{project}' runs outside the project source tree")]
  WorkingRootOutsideSource { project: String, check: String },

  #[error("unsupported {tool} version '{version}' (supported: {})", .supported.join(", "))]
  UnsupportedVersion {
    tool: &'static str,
    version: String,
    supported: Vec<&'static str>,
  },

  #[error("invalid option '{option}': {message}")]
  InvalidOption { option: &'static str, message: String },
}

/// A named command bound to an environment and a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
  pub name: String,
  pub command: String,
  pub environment: Environment,
  pub working_root: PathBuf,
}

impl Check {
  pub fn new(
    name: impl Into<String>,
    command: impl Into<String>,
    environment: Environment,
    working_root: impl Into<PathBuf>,
  ) -> Self {
    Self {
      name: name.into(),
      command: command.into(),
      environment,
      working_root: working_root.into(),
    }
  }
}

/// Metadata for [`mk_project`].
#[derive(Debug, Clone)]
pub struct ProjectMeta {
  pub description: String,
  pub src: PathBuf,
  pub default_environment: Environment,
}

impl ProjectMeta {
  pub fn new(description: impl Into<String>, src: impl Into<PathBuf>) -> Self {
    Self {
      description: description.into(),
      src: src.into(),
      default_environment: Environment::empty(),
    }
  }

  pub fn default_environment(mut self, environment: Environment) -> Self {
    self.default_environment = environment;
    self
  }
}

/// A source tree paired with its environments, checks and build entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub description: String,
  pub source_root: PathBuf,
  pub default_environment: Environment,
  #[serde(default)]
  pub environments: BTreeMap<String, Environment>,
  #[serde(default)]
  pub checks: Vec<Check>,
  #[serde(default)]
  pub build: Option<String>,
  #[serde(default = "default_exclusions")]
  pub source_exclusions: Vec<String>,
}

fn default_exclusions() -> Vec<String> {
  DEFAULT_SOURCE_EXCLUSIONS.iter().map(|s| s.to_string()).collect()
}

/// Create a generic project.
///
/// `environments` are named sub-environments (e.g. `build`, `test`) that
/// checks can select with [`Project::add_check_in`].
pub fn mk_project(meta: ProjectMeta, environments: BTreeMap<String, Environment>) -> Project {
  Project {
    description: meta.description,
    source_root: meta.src,
    default_environment: meta.default_environment,
    environments,
    checks: Vec::new(),
    build: None,
    source_exclusions: default_exclusions(),
  }
}

impl Project {
  /// Add a check running in the default environment at the source root.
  pub fn add_check(self, name: impl Into<String>, command: impl Into<String>) -> Result<Self, ValidationError> {
    let environment = self.default_environment.clone();
    self.add_check_with(name, command, environment)
  }

  /// Add a check running in the named sub-environment.
  pub fn add_check_in(
    self,
    environment: &str,
    name: impl Into<String>,
    command: impl Into<String>,
  ) -> Result<Self, ValidationError> {
    let env = self
      .environments
      .get(environment)
      .cloned()
      .ok_or_else(|| ValidationError::UnknownEnvironment {
        project: self.description.clone(),
        environment: environment.to_string(),
      })?;
    self.add_check_with(name, command, env)
  }

  /// Add a check running in an explicit environment.
  pub fn add_check_with(
    mut self,
    name: impl Into<String>,
    command: impl Into<String>,
    environment: Environment,
  ) -> Result<Self, ValidationError> {
    let check = Check::new(name, command, environment, self.source_root.clone());
    validate_name("check", &check.name)?;
    if self.check(&check.name).is_some() {
      return Err(ValidationError::DuplicateCheck {
        project: self.description.clone(),
        check: check.name,
      });
    }
    self.checks.push(check);
    Ok(self)
  }

  /// Set the build entry point.
  pub fn with_build(mut self, command: impl Into<String>) -> Self {
    self.build = Some(command.into());
    self
  }

  /// Add a named sub-environment.
  pub fn with_environment(mut self, name: impl Into<String>, environment: Environment) -> Self {
    self.environments.insert(name.into(), environment);
    self
  }

  /// Skip an additional file or directory name when hashing the source tree.
  pub fn exclude_from_source(mut self, name: impl Into<String>) -> Self {
    let name = name.into();
    if !self.source_exclusions.contains(&name) {
      self.source_exclusions.push(name);
    }
    self
  }

  /// Look up a check by name.
  pub fn check(&self, name: &str) -> Option<&Check> {
    self.checks.iter().find(|c| c.name == name)
  }

  /// Validate check names and commands.
  ///
  /// Errors name the project by its description, the same way the builder
  /// methods do.
  pub fn validate(&self) -> Result<(), ValidationError> {
    let project = self.description.as_str();
    let mut seen = HashSet::new();
    for check in &self.checks {
      validate_name("check", &check.name)?;
      if !seen.insert(check.name.as_str()) {
        return Err(ValidationError::DuplicateCheck {
          project: project.to_string(),
          check: check.name.clone(),
        });
      }
      if check.command.trim().is_empty() {
        return Err(ValidationError::EmptyCommand {
          project: project.to_string(),
          check: check.name.clone(),
        });
      }
    }
    if let Some(build) = &self.build
      && build.trim().is_empty()
    {
      return Err(ValidationError::EmptyCommand {
        project: project.to_string(),
        check: "build".to_string(),
      });
    }
    Ok(())
  }

  /// Source root resolved against `base` when relative.
  pub fn source_root_in(&self, base: &Path) -> PathBuf {
    if self.source_root.is_absolute() {
      self.source_root.clone()
    } else {
      base.join(&self.source_root)
    }
  }
}

pub(crate) fn validate_name(kind: &'static str, name: &str) -> Result<(), ValidationError> {
  if name.is_empty() || name.contains('.') || name.chars().any(char::is_whitespace) {
    return Err(ValidationError::InvalidName {
      kind,
      name: name.to_string(),
    });
  }
  Ok(())
}

/// The declaration forest: named projects and standalone environments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Declarations {
  #[serde(default)]
  pub projects: BTreeMap<String, Project>,
  #[serde(default)]
  pub environments: BTreeMap<String, Environment>,
}

impl Declarations {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn project(mut self, name: impl Into<String>, project: Project) -> Self {
    self.projects.insert(name.into(), project);
    self
  }

  pub fn environment(mut self, name: impl Into<String>, environment: Environment) -> Self {
    self.environments.insert(name.into(), environment);
    self
  }

  /// Every declared check as `(project, check)`, in project name order then
  /// declaration order.
  pub fn list_checks(&self) -> Vec<(&str, &Check)> {
    self
      .projects
      .iter()
      .flat_map(|(name, project)| project.checks.iter().map(move |check| (name.as_str(), check)))
      .collect()
  }
}
