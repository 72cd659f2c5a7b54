use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn clean_with_empty_store_succeeds() {
  let env = TestEnv::new("{}");

  env
    .kiln_cmd()
    .arg("clean")
    .assert()
    .success()
    .stdout(predicate::str::contains("Store cleaned"));
}

#[test]
fn clean_json_output_is_valid() {
  let env = TestEnv::new("{}");

  env
    .kiln_cmd()
    .args(["-o", "json", "clean"])
    .assert()
    .success()
    .stdout(predicate::str::contains("records"))
    .stdout(predicate::str::contains("builds"));
}

#[cfg(unix)]
#[test]
fn clean_forces_rerun() {
  let env = TestEnv::new(r#"{ "projects": { "app": { "src": "app", "checks": [{ "name": "t", "command": "exit 0" }] } } }"#);
  env.write_file("app/file.txt", "x");

  env.json_report(&["check"]);
  let output = env.kiln_cmd().args(["-o", "json", "clean"]).output().unwrap();
  let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(stats["records"], 2);
  assert_eq!(stats["logs"], 1);

  let (code, report) = env.json_report(&["check"]);
  assert_eq!(code, 0);
  assert_eq!(report["counts"]["passed"], 1);
}
