use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tempfile::TempDir;

use kiln_lib::env::Environment;
use kiln_lib::eval::evaluate;
use kiln_lib::graph::{NodeId, NodeKind, TargetKind};
use kiln_lib::package::PackageRef;
use kiln_lib::project::{Declarations, NpmProjectOptions, ProjectMeta, mk_npm_project, mk_project};
use kiln_lib::store::LocalStore;

fn tree(dir: &Path, files: &[(&str, &str)]) {
  for (name, content) in files {
    let path = dir.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }
}

fn check_id(base: &Path, command: &str) -> NodeId {
  let project = mk_project(ProjectMeta::new("app", "app"), BTreeMap::new())
    .add_check("test", command)
    .unwrap();
  let graph = evaluate(&Declarations::new().project("app", project), &LocalStore::new(), base).unwrap();
  graph
    .targets()
    .iter()
    .find(|t| t.kind == TargetKind::Check)
    .map(|t| t.node.clone())
    .unwrap()
}

#[test]
fn identical_trees_give_identical_check_ids() {
  let a = TempDir::new().unwrap();
  let b = TempDir::new().unwrap();
  let files = [("app/src/main.rs", "fn main() {}"), ("app/Cargo.toml", "[package]")];
  tree(a.path(), &files);
  tree(b.path(), &files);

  assert_eq!(check_id(a.path(), "cargo test"), check_id(b.path(), "cargo test"));
  assert_ne!(check_id(a.path(), "cargo test"), check_id(a.path(), "cargo test --release"));

  tree(b.path(), &[("app/src/main.rs", "fn main() { }")]);
  assert_ne!(check_id(a.path(), "cargo test"), check_id(b.path(), "cargo test"));
}

#[test]
fn excluded_entries_do_not_change_ids() {
  let dir = TempDir::new().unwrap();
  tree(dir.path(), &[("app/main.txt", "x")]);
  let before = check_id(dir.path(), "true");

  tree(dir.path(), &[("app/.git/HEAD", "ref: refs/heads/main")]);
  assert_eq!(check_id(dir.path(), "true"), before);
}

#[test]
fn npm_projects_with_same_node_share_an_environment() {
  let dir = TempDir::new().unwrap();
  tree(dir.path(), &[("web/package.json", "{}"), ("admin/package.json", "{\"x\":1}")]);
  fs::create_dir_all(dir.path().join("tools/node18/bin")).unwrap();
  let store = LocalStore::new().with_package("nodejs@18", dir.path().join("tools/node18"));

  let web = mk_npm_project(NpmProjectOptions::new("web", "web"))
    .unwrap()
    .add_check("test", "npm test")
    .unwrap();
  let admin = mk_npm_project(NpmProjectOptions::new("admin", "admin"))
    .unwrap()
    .add_check("test", "npm test")
    .unwrap();
  let decls = Declarations::new().project("web", web).project("admin", admin);
  let graph = evaluate(&decls, &store, dir.path()).unwrap();

  let envs: Vec<_> = graph
    .nodes()
    .filter(|n| matches!(n.kind, NodeKind::MaterializeEnvironment { .. }))
    .collect();
  assert_eq!(envs.len(), 1);

  // Two checks and two builds, all on the one environment.
  let dependents = graph.dependents(&envs[0].id);
  assert_eq!(dependents.len(), 4);
  assert_eq!(
    graph.targets().iter().filter(|t| t.kind == TargetKind::Build).count(),
    2
  );
}

#[test]
fn selecting_a_check_keeps_only_its_closure() {
  let dir = TempDir::new().unwrap();
  tree(dir.path(), &[("app/main.txt", "x"), ("lib/lib.txt", "y")]);
  let tools = dir.path().join("tools");
  fs::create_dir_all(&tools).unwrap();
  let store = LocalStore::new().with_package("jq", &tools);

  let app = mk_project(ProjectMeta::new("app", "app"), BTreeMap::new())
    .add_check("lint", "true")
    .unwrap()
    .add_check_with("query", "jq .", Environment::empty().with_dev_tools([PackageRef::registry("jq")]))
    .unwrap();
  let lib = mk_project(ProjectMeta::new("lib", "lib"), BTreeMap::new())
    .add_check("test", "true")
    .unwrap();
  let graph = evaluate(
    &Declarations::new().project("app", app).project("lib", lib),
    &store,
    dir.path(),
  )
  .unwrap();

  let selected = graph.select(&["app.query".to_string()], |_| true).unwrap();
  assert_eq!(selected.targets().len(), 1);
  assert_eq!(selected.len(), 2, "the check and its environment");

  let project = graph.select(&["app".to_string()], |t| t.kind == TargetKind::Check).unwrap();
  assert_eq!(project.targets().len(), 2);
}

#[test]
fn environment_only_project_can_be_planned() {
  let dir = TempDir::new().unwrap();
  let tools = dir.path().join("tools/deno");
  fs::create_dir_all(&tools).unwrap();
  let store = LocalStore::new().with_package("deno", &tools);

  let env = Environment::empty().with_dev_tools([PackageRef::registry("deno")]);
  let deno = mk_project(
    ProjectMeta::new("deno config", ".").default_environment(env),
    BTreeMap::new(),
  );
  let graph = evaluate(&Declarations::new().project("deno", deno), &store, dir.path()).unwrap();

  let selected = graph.select(&["deno".to_string()], |_| true).unwrap();
  assert_eq!(selected.len(), 1);
  assert_eq!(selected.targets()[0].kind, TargetKind::Environment);
  assert!(matches!(
    selected.nodes().next().unwrap().kind,
    NodeKind::MaterializeEnvironment { .. }
  ));
}
