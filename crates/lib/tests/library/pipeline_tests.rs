use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use kiln_lib::cache::ResultCache;
use kiln_lib::env::Environment;
use kiln_lib::eval::evaluate;
use kiln_lib::execute::{CancelToken, ExecuteConfig, execute};
use kiln_lib::graph::TargetKind;
use kiln_lib::package::PackageRef;
use kiln_lib::project::{Declarations, ProjectMeta, mk_project};
use kiln_lib::report::{Report, RunStatus, TargetStatus};
use kiln_lib::store::{
  ArtifactStore, LocalStore, MaterializedEnv, ResolvedClosure, ResolvedPackage, StoreError,
};

/// Resolves like a local store but refuses to realize closures carrying `broken`.
struct FlakyStore(LocalStore);

impl ArtifactStore for FlakyStore {
  fn resolve(&self, package: &PackageRef) -> Result<ResolvedPackage, StoreError> {
    self.0.resolve(package)
  }

  fn realize(&self, closure: &ResolvedClosure, dest: &Path) -> Result<MaterializedEnv, StoreError> {
    if closure.packages.contains_key("broken") {
      return Err(StoreError::Io {
        path: dest.to_path_buf(),
        source: std::io::Error::other("mirror unreachable"),
      });
    }
    self.0.realize(closure, dest)
  }
}

fn config() -> ExecuteConfig {
  ExecuteConfig {
    parallelism: 4,
    shell: None,
    timeout: None,
    grace_period: Duration::from_secs(1),
  }
}

async fn run(decls: &Declarations, store: Arc<dyn ArtifactStore>, base: &Path, cache: &ResultCache) -> Report {
  let graph = evaluate(decls, store.as_ref(), base)
    .unwrap()
    .select(&[], |t| t.kind == TargetKind::Check)
    .unwrap();
  let results = execute(&graph, store, cache, &config(), &CancelToken::new()).await.unwrap();
  Report::new(&graph, &results)
}

#[tokio::test]
async fn environment_failure_skips_its_checks_only() {
  let dir = TempDir::new().unwrap();
  fs::create_dir_all(dir.path().join("app")).unwrap();
  fs::write(dir.path().join("app/main.txt"), "x").unwrap();
  fs::create_dir_all(dir.path().join("tools/broken")).unwrap();
  let cache = ResultCache::open(dir.path().join("store")).unwrap();

  let local = LocalStore::new().with_package("broken", dir.path().join("tools/broken"));
  let broken_env = Environment::empty().with_dev_tools([PackageRef::registry("broken")]);
  let project = mk_project(ProjectMeta::new("app", "app"), BTreeMap::new())
    .with_environment("broken", broken_env)
    .add_check("plain", "exit 0")
    .unwrap()
    .add_check_in("broken", "needs-tool", "exit 0")
    .unwrap();
  let decls = Declarations::new().project("app", project);

  let report = run(&decls, Arc::new(FlakyStore(local)), dir.path(), &cache).await;
  assert_eq!(report.status, RunStatus::Failed);
  assert!(matches!(
    report.targets.iter().find(|t| t.target == "app.needs-tool").unwrap().status,
    TargetStatus::Skipped { .. }
  ));
  assert_eq!(
    report.targets.iter().find(|t| t.target == "app.plain").unwrap().status,
    TargetStatus::Passed
  );

  let json = serde_json::to_string(&report).unwrap();
  assert!(json.contains("mirror unreachable"), "{json}");
  assert_eq!(report.errors.len(), 1);
}

#[tokio::test]
async fn second_run_is_fully_cached_with_same_statuses() {
  let dir = TempDir::new().unwrap();
  fs::create_dir_all(dir.path().join("app")).unwrap();
  fs::write(dir.path().join("app/main.txt"), "x").unwrap();
  let cache = ResultCache::open(dir.path().join("store")).unwrap();

  let project = mk_project(ProjectMeta::new("app", "app"), BTreeMap::new())
    .add_check("a", "echo a")
    .unwrap()
    .add_check("b", "echo b")
    .unwrap();
  let decls = Declarations::new().project("app", project);
  let store: Arc<dyn ArtifactStore> = Arc::new(LocalStore::new());

  let first = run(&decls, store.clone(), dir.path(), &cache).await;
  let second = run(&decls, store, dir.path(), &cache).await;

  assert!(first.is_success() && second.is_success());
  assert_eq!(first.counts.passed, 2);
  assert_eq!(second.counts.cached, 2);
  for (a, b) in first.targets.iter().zip(&second.targets) {
    assert_eq!(a.node, b.node);
    assert_eq!(a.log, b.log);
  }
}
