//! Declaration evaluation.
//!
//! [`evaluate`] walks a [`Declarations`] forest and produces the
//! [`BuildGraph`] that the executor runs. Evaluation resolves every package
//! through the artifact store and hashes every source tree, but never runs a
//! command: the same declarations, store and sources always give the same
//! graph.
//!
//! # Node identity
//!
//! - environment: hash of its resolved closure
//! - check: hash of command, environment id, source hash and the working
//!   directory relative to the source root
//! - build: hash of command, environment id, source hash and exclusions
//!
//! Project and check names are not part of any id, so identical checks
//! declared under different names share one node.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::env::Environment;
use crate::graph::{BuildGraph, BuildNode, GraphError, NodeId, NodeKind, Target, TargetKind};
use crate::package::PackageSource;
use crate::project::{Check, Declarations, Project, ValidationError, validate_name};
use crate::store::{ArtifactStore, ResolvedClosure, StoreError};
use crate::util::hash::{ContentHash, DirHashError, HashError, Hashable, hash_directory};

#[derive(Debug, Error)]
pub enum EvalError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("'{owner}' references '{identifier}', which cannot be resolved: {source}")]
  UnresolvedReference {
    owner: String,
    identifier: String,
    #[source]
    source: StoreError,
  },

  #[error("project '{project}': cannot read source tree {}: {source}", .path.display())]
  Source {
    project: String,
    path: PathBuf,
    #[source]
    source: DirHashError,
  },

  #[error("failed to hash node inputs: {0}")]
  Hash(#[from] HashError),

  #[error(transparent)]
  Graph(#[from] GraphError),
}

#[derive(Serialize)]
struct CheckKey<'a> {
  kind: &'static str,
  command: &'a str,
  environment: &'a NodeId,
  source_hash: &'a ContentHash,
  working_dir: String,
}

impl Hashable for CheckKey<'_> {}

#[derive(Serialize)]
struct BuildKey<'a> {
  kind: &'static str,
  command: &'a str,
  environment: &'a NodeId,
  source_hash: &'a ContentHash,
  exclusions: &'a [String],
}

impl Hashable for BuildKey<'_> {}

/// Turn declarations into a build graph.
///
/// Relative source roots and working directories are resolved against
/// `base_dir`. Projects are evaluated in name order and the first error is
/// returned.
pub fn evaluate(decls: &Declarations, store: &dyn ArtifactStore, base_dir: &Path) -> Result<BuildGraph, EvalError> {
  let mut eval = Evaluator {
    store,
    base_dir,
    graph: BuildGraph::new(),
    env_nodes: HashMap::new(),
  };

  for (name, project) in &decls.projects {
    eval.project(name, project)?;
  }
  for (name, env) in &decls.environments {
    validate_name("environment", name)?;
    let node = eval.environment(name, env, None)?;
    eval.graph.add_target(Target {
      kind: TargetKind::Environment,
      project: None,
      name: name.clone(),
      node,
    })?;
  }

  info!(
    nodes = eval.graph.len(),
    targets = eval.graph.targets().len(),
    "evaluated declarations"
  );
  Ok(eval.graph)
}

struct Evaluator<'a> {
  store: &'a dyn ArtifactStore,
  base_dir: &'a Path,
  graph: BuildGraph,
  /// Environment closure hash to node id, to skip re-resolving shared environments.
  env_nodes: HashMap<String, NodeId>,
}

impl Evaluator<'_> {
  fn project(&mut self, name: &str, project: &Project) -> Result<(), EvalError> {
    validate_name("project", name)?;
    project.validate()?;

    // Every declared environment is resolved, used or not, so a missing
    // tool is reported before anything runs.
    let default_env = self.environment(name, &project.default_environment, None)?;
    self.graph.add_target(Target {
      kind: TargetKind::Environment,
      project: Some(name.to_string()),
      name: name.to_string(),
      node: default_env.clone(),
    })?;
    for (env_name, env) in &project.environments {
      self.environment(&format!("{name}:{env_name}"), env, None)?;
    }

    if project.checks.is_empty() && project.build.is_none() {
      debug!(project = name, "project declares only environments");
      return Ok(());
    }

    let source_root = project.source_root_in(self.base_dir);
    let exclusions: Vec<&str> = project.source_exclusions.iter().map(String::as_str).collect();
    let source_hash = hash_directory(&source_root, &exclusions).map_err(|source| EvalError::Source {
      project: name.to_string(),
      path: source_root.clone(),
      source,
    })?;
    debug!(project = name, source = %source_hash, "hashed source tree");

    for check in &project.checks {
      self.check(name, check, &source_root, &source_hash)?;
    }

    if let Some(command) = &project.build {
      let id = BuildKey {
        kind: "build",
        command,
        environment: &default_env,
        source_hash: &source_hash,
        exclusions: &project.source_exclusions,
      }
      .compute_hash()?;
      let id = NodeId(id.0);

      self.graph.insert(BuildNode {
        id: id.clone(),
        kind: NodeKind::BuildProject {
          command: command.clone(),
          source_root: source_root.clone(),
          source_hash: source_hash.clone(),
          environment: default_env.clone(),
          exclusions: project.source_exclusions.clone(),
        },
        dependencies: BTreeSet::from([default_env]),
      })?;
      self.graph.add_target(Target {
        kind: TargetKind::Build,
        project: Some(name.to_string()),
        name: name.to_string(),
        node: id,
      })?;
    }

    Ok(())
  }

  fn check(
    &mut self,
    project_name: &str,
    check: &Check,
    source_root: &Path,
    source_hash: &ContentHash,
  ) -> Result<(), EvalError> {
    let working_dir = if check.working_root.is_absolute() {
      check.working_root.clone()
    } else {
      self.base_dir.join(&check.working_root)
    };
    let relative = working_dir
      .strip_prefix(source_root)
      .map_err(|_| ValidationError::WorkingRootOutsideSource {
        project: project_name.to_string(),
        check: check.name.clone(),
      })?
      .to_string_lossy()
      .replace('\\', "/");

    let environment = self.environment(
      &format!("{project_name}.{}", check.name),
      &check.environment,
      Some((project_name, &check.name)),
    )?;
    let id = CheckKey {
      kind: "check",
      command: &check.command,
      environment: &environment,
      source_hash,
      working_dir: relative,
    }
    .compute_hash()?;
    let id = NodeId(id.0);

    let inserted = self.graph.insert(BuildNode {
      id: id.clone(),
      kind: NodeKind::RunCheck {
        command: check.command.clone(),
        working_dir,
        source_hash: source_hash.clone(),
        environment: environment.clone(),
      },
      dependencies: BTreeSet::from([environment]),
    })?;
    if !inserted {
      debug!(project = project_name, check = %check.name, node = %id.short(), "check shares an existing node");
    }

    self.graph.add_target(Target {
      kind: TargetKind::Check,
      project: Some(project_name.to_string()),
      name: check.name.clone(),
      node: id,
    })?;
    Ok(())
  }

  /// Resolve `env` into a MaterializeEnvironment node, reusing the node of an
  /// identical closure. `check` is `(project, check)` when the environment
  /// belongs to a check, so a reference to that check's own output is named
  /// as such.
  fn environment(&mut self, owner: &str, env: &Environment, check: Option<(&str, &str)>) -> Result<NodeId, EvalError> {
    let closure = env.closure();
    for package in closure.packages.values() {
      if let PackageSource::CheckOutput {
        project: ref_project,
        check: ref_check,
      } = &package.source
      {
        if let Some((project, name)) = check
          && ref_project == project
          && ref_check == name
        {
          return Err(
            ValidationError::SelfReferentialCheck {
              project: project.to_string(),
              check: name.to_string(),
            }
            .into(),
          );
        }
        return Err(
          ValidationError::CheckAsInput {
            owner: owner.to_string(),
            referenced: format!("{ref_project}.{ref_check}"),
          }
          .into(),
        );
      }
    }

    let key = closure.compute_hash()?.0;
    if let Some(id) = self.env_nodes.get(&key) {
      return Ok(id.clone());
    }

    let mut resolved = ResolvedClosure {
      variables: closure.variables,
      ..Default::default()
    };
    for (name, package) in closure.packages {
      let pinned = self
        .store
        .resolve(&package)
        .map_err(|source| EvalError::UnresolvedReference {
          owner: owner.to_string(),
          identifier: package.identifier(),
          source,
        })?;
      resolved.packages.insert(name, pinned);
    }

    let id = NodeId(resolved.compute_hash()?.0);
    self.graph.insert(BuildNode {
      id: id.clone(),
      kind: NodeKind::MaterializeEnvironment { closure: resolved },
      dependencies: BTreeSet::new(),
    })?;
    self.env_nodes.insert(key, id.clone());
    Ok(id)
  }
}
