//! The content-addressed build graph.
//!
//! Every node is identified by the hash of the inputs that determine its
//! outcome, so inserting an equal node twice is a no-op and identical work
//! declared in several places collapses into one node. Edges point from a
//! dependency to its dependents.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::ResolvedClosure;
use crate::util::hash::ContentHash;

/// Content-addressed node id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(8)]
  }
}

impl std::fmt::Display for NodeId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// What a node does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
  /// Make a resolved environment usable.
  MaterializeEnvironment { closure: ResolvedClosure },
  /// Run a check command; success is exit status 0.
  RunCheck {
    command: String,
    working_dir: PathBuf,
    source_hash: ContentHash,
    environment: NodeId,
  },
  /// Run a build command that writes into `$out`.
  BuildProject {
    command: String,
    source_root: PathBuf,
    source_hash: ContentHash,
    environment: NodeId,
    exclusions: Vec<String>,
  },
}

impl NodeKind {
  pub fn label(&self) -> &'static str {
    match self {
      NodeKind::MaterializeEnvironment { .. } => "env",
      NodeKind::RunCheck { .. } => "check",
      NodeKind::BuildProject { .. } => "build",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildNode {
  pub id: NodeId,
  pub kind: NodeKind,
  pub dependencies: BTreeSet<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
  Check,
  Build,
  Environment,
}

/// A user-facing name mapped onto a node.
///
/// Several targets may share a node when their work is identical.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target {
  pub kind: TargetKind,
  /// Owning project; `None` for standalone environments.
  pub project: Option<String>,
  pub name: String,
  pub node: NodeId,
}

impl Target {
  /// `project.check` for checks, the project name for builds and the
  /// environment name for environments.
  pub fn label(&self) -> String {
    match (&self.kind, &self.project) {
      (TargetKind::Check, Some(project)) => format!("{}.{}", project, self.name),
      _ => self.name.clone(),
    }
  }

  /// Whether `selector` names this target.
  ///
  /// A bare project name selects every target of the project; `project.check`
  /// selects one check.
  pub fn matches(&self, selector: &str) -> bool {
    match selector.split_once('.') {
      Some((project, check)) => {
        self.kind == TargetKind::Check && self.project.as_deref() == Some(project) && self.name == check
      }
      None => self.project.as_deref() == Some(selector) || self.name == selector,
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("node {node} depends on {dependency}, which is not in the graph")]
  MissingDependency { node: NodeId, dependency: NodeId },

  #[error("node {0} is not in the graph")]
  UnknownNode(NodeId),

  #[error("no target matches '{0}'")]
  UnknownTarget(String),

  #[error("dependency cycle detected")]
  CycleDetected,
}

/// A DAG of build nodes plus the targets that name them.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
  graph: DiGraph<NodeId, ()>,
  index: HashMap<NodeId, NodeIndex>,
  nodes: BTreeMap<NodeId, BuildNode>,
  targets: Vec<Target>,
}

impl BuildGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a node whose dependencies are already present.
  ///
  /// Returns `false` when a node with the same id exists; the graph is left
  /// unchanged in that case.
  pub fn insert(&mut self, node: BuildNode) -> Result<bool, GraphError> {
    if self.nodes.contains_key(&node.id) {
      return Ok(false);
    }
    for dep in &node.dependencies {
      if !self.index.contains_key(dep) {
        return Err(GraphError::MissingDependency {
          node: node.id.clone(),
          dependency: dep.clone(),
        });
      }
    }

    let idx = self.graph.add_node(node.id.clone());
    for dep in &node.dependencies {
      self.graph.add_edge(self.index[dep], idx, ());
    }
    self.index.insert(node.id.clone(), idx);
    self.nodes.insert(node.id.clone(), node);
    Ok(true)
  }

  /// Name a node. Duplicate targets are ignored.
  pub fn add_target(&mut self, target: Target) -> Result<(), GraphError> {
    if !self.nodes.contains_key(&target.node) {
      return Err(GraphError::UnknownNode(target.node));
    }
    if !self.targets.contains(&target) {
      self.targets.push(target);
    }
    Ok(())
  }

  pub fn node(&self, id: &NodeId) -> Option<&BuildNode> {
    self.nodes.get(id)
  }

  pub fn nodes(&self) -> impl Iterator<Item = &BuildNode> {
    self.nodes.values()
  }

  pub fn targets(&self) -> &[Target] {
    &self.targets
  }

  /// Targets that name `id`.
  pub fn targets_for<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Target> + 'a {
    self.targets.iter().filter(move |t| &t.node == id)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, id: &NodeId) -> bool {
    self.nodes.contains_key(id)
  }

  /// Direct dependencies of `id`.
  pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Direct dependents of `id`.
  pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
    self.neighbors(id, Direction::Outgoing)
  }

  fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<NodeId> {
    let Some(&idx) = self.index.get(id) else {
      return Vec::new();
    };
    let mut out: Vec<NodeId> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    out.sort();
    out.dedup();
    out
  }

  /// Every node reachable from `id` along dependent edges, excluding `id`.
  pub fn transitive_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
    let mut seen = BTreeSet::new();
    let mut stack = self.dependents(id);
    while let Some(next) = stack.pop() {
      if seen.insert(next.clone()) {
        stack.extend(self.dependents(&next));
      }
    }
    seen
  }

  /// Node ids with dependencies before dependents.
  pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
    let sorted = toposort(&self.graph, None).map_err(|_| GraphError::CycleDetected)?;
    Ok(sorted.into_iter().map(|idx| self.graph[idx].clone()).collect())
  }

  /// Groups of nodes whose dependencies all sit in earlier groups.
  pub fn waves(&self) -> Result<Vec<Vec<NodeId>>, GraphError> {
    let mut level: HashMap<NodeIndex, usize> = HashMap::new();
    let sorted = toposort(&self.graph, None).map_err(|_| GraphError::CycleDetected)?;

    for idx in &sorted {
      let l = self
        .graph
        .neighbors_directed(*idx, Direction::Incoming)
        .filter_map(|dep| level.get(&dep))
        .map(|l| l + 1)
        .max()
        .unwrap_or(0);
      level.insert(*idx, l);
    }

    let depth = level.values().max().map(|m| m + 1).unwrap_or(0);
    let mut waves = vec![Vec::new(); depth];
    for (idx, l) in level {
      waves[l].push(self.graph[idx].clone());
    }
    for wave in &mut waves {
      wave.sort();
    }
    Ok(waves)
  }

  /// The subgraph needed for the targets matching any of `selectors`.
  ///
  /// Every selector must match at least one target. An empty selector list
  /// keeps every target accepted by `filter`.
  pub fn select(&self, selectors: &[String], filter: impl Fn(&Target) -> bool) -> Result<BuildGraph, GraphError> {
    let mut chosen: Vec<&Target> = Vec::new();
    if selectors.is_empty() {
      chosen.extend(self.targets.iter().filter(|t| filter(*t)));
    } else {
      for selector in selectors {
        let matched: Vec<&Target> = self
          .targets
          .iter()
          .filter(|t| filter(*t) && t.matches(selector))
          .collect();
        if matched.is_empty() {
          return Err(GraphError::UnknownTarget(selector.clone()));
        }
        for t in matched {
          if !chosen.contains(&t) {
            chosen.push(t);
          }
        }
      }
    }

    let mut keep: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = chosen.iter().map(|t| t.node.clone()).collect();
    while let Some(id) = stack.pop() {
      if keep.insert(id.clone()) {
        stack.extend(self.dependencies(&id));
      }
    }

    let mut sub = BuildGraph::new();
    for id in self.topological_order()? {
      if keep.contains(&id) {
        sub.insert(self.nodes[&id].clone())?;
      }
    }
    for t in chosen {
      sub.add_target(t.clone())?;
    }
    Ok(sub)
  }

  /// A serializable view, for `kiln plan`.
  pub fn plan(&self) -> Plan {
    Plan {
      nodes: self.nodes.values().cloned().collect(),
      targets: self.targets.clone(),
    }
  }
}

/// Serializable snapshot of a [`BuildGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
  pub nodes: Vec<BuildNode>,
  pub targets: Vec<Target>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn env_node(id: &str) -> BuildNode {
    BuildNode {
      id: NodeId(id.to_string()),
      kind: NodeKind::MaterializeEnvironment {
        closure: ResolvedClosure::default(),
      },
      dependencies: BTreeSet::new(),
    }
  }

  fn check_node(id: &str, env: &str) -> BuildNode {
    BuildNode {
      id: NodeId(id.to_string()),
      kind: NodeKind::RunCheck {
        command: format!("run {id}"),
        working_dir: PathBuf::from("."),
        source_hash: ContentHash("0".repeat(64)),
        environment: NodeId(env.to_string()),
      },
      dependencies: BTreeSet::from([NodeId(env.to_string())]),
    }
  }

  fn check_target(project: &str, name: &str, node: &str) -> Target {
    Target {
      kind: TargetKind::Check,
      project: Some(project.to_string()),
      name: name.to_string(),
      node: NodeId(node.to_string()),
    }
  }

  fn sample() -> BuildGraph {
    let mut g = BuildGraph::new();
    g.insert(env_node("e1")).unwrap();
    g.insert(env_node("e2")).unwrap();
    g.insert(check_node("c1", "e1")).unwrap();
    g.insert(check_node("c2", "e1")).unwrap();
    g.insert(check_node("c3", "e2")).unwrap();
    g.add_target(check_target("frontend", "test", "c1")).unwrap();
    g.add_target(check_target("frontend", "lint", "c2")).unwrap();
    g.add_target(check_target("backend", "vet", "c3")).unwrap();
    g
  }

  #[test]
  fn insert_is_idempotent() {
    let mut g = BuildGraph::new();
    assert!(g.insert(env_node("e1")).unwrap());
    assert!(!g.insert(env_node("e1")).unwrap());
    assert_eq!(g.len(), 1);
  }

  #[test]
  fn insert_requires_dependencies_first() {
    let mut g = BuildGraph::new();
    let err = g.insert(check_node("c1", "e1")).unwrap_err();
    assert!(matches!(err, GraphError::MissingDependency { .. }));
    assert!(g.is_empty());
  }

  #[test]
  fn dependencies_and_dependents() {
    let g = sample();
    let e1 = NodeId("e1".to_string());
    assert_eq!(g.dependents(&e1), vec![NodeId("c1".to_string()), NodeId("c2".to_string())]);
    assert_eq!(g.dependencies(&NodeId("c3".to_string())), vec![NodeId("e2".to_string())]);
    assert_eq!(g.transitive_dependents(&e1).len(), 2);
  }

  #[test]
  fn topological_order_puts_environments_first() {
    let g = sample();
    let order = g.topological_order().unwrap();
    let pos = |id: &str| order.iter().position(|n| n.0 == id).unwrap();
    assert!(pos("e1") < pos("c1"));
    assert!(pos("e1") < pos("c2"));
    assert!(pos("e2") < pos("c3"));
  }

  #[test]
  fn waves_group_independent_nodes() {
    let waves = sample().waves().unwrap();
    assert_eq!(waves.len(), 2);
    assert_eq!(waves[0].len(), 2);
    assert_eq!(waves[1].len(), 3);
  }

  #[test]
  fn select_by_project_and_check() {
    let g = sample();

    let frontend = g.select(&["frontend".to_string()], |_| true).unwrap();
    assert_eq!(frontend.targets().len(), 2);
    assert_eq!(frontend.len(), 3);

    let vet = g.select(&["backend.vet".to_string()], |_| true).unwrap();
    assert_eq!(vet.targets().len(), 1);
    assert!(vet.contains(&NodeId("e2".to_string())));
    assert!(!vet.contains(&NodeId("e1".to_string())));
  }

  #[test]
  fn select_unknown_target_fails() {
    let err = sample().select(&["frontend.nope".to_string()], |_| true).unwrap_err();
    assert_eq!(err, GraphError::UnknownTarget("frontend.nope".to_string()));
  }

  #[test]
  fn shared_node_keeps_both_targets() {
    let mut g = sample();
    g.add_target(check_target("mirror", "test", "c1")).unwrap();
    let names: Vec<_> = g.targets_for(&NodeId("c1".to_string())).map(|t| t.label()).collect();
    assert_eq!(names, ["frontend.test", "mirror.test"]);
  }

  #[test]
  fn target_label_formats() {
    assert_eq!(check_target("frontend", "test", "c1").label(), "frontend.test");
    let build = Target {
      kind: TargetKind::Build,
      project: Some("backend".to_string()),
      name: "backend".to_string(),
      node: NodeId("b".to_string()),
    };
    assert_eq!(build.label(), "backend");
    assert!(build.matches("backend"));
    assert!(!build.matches("backend.vet"));
  }
}
