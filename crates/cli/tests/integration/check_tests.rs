use std::os::unix::fs::PermissionsExt;

use predicates::prelude::*;

use super::common::{TestEnv, target};

fn single_check(command: &str) -> String {
  serde_json::json!({
    "projects": {
      "app": { "src": "app", "checks": [{ "name": "test", "command": command }] }
    }
  })
  .to_string()
}

fn app_env(config: &str) -> TestEnv {
  let env = TestEnv::new(config);
  env.write_file("app/main.txt", "hello\n");
  env
}

#[test]
fn success_then_cached_then_failure_with_new_node() {
  let env = app_env(&single_check("exit 0"));

  let (code, first) = env.json_report(&["check"]);
  assert_eq!(code, 0);
  assert_eq!(target(&first, "app.test")["status"], "passed");
  assert_eq!(first["status"], "success");

  let (code, second) = env.json_report(&["check"]);
  assert_eq!(code, 0);
  assert_eq!(target(&second, "app.test")["status"], "cached");
  assert_eq!(target(&second, "app.test")["node"], target(&first, "app.test")["node"]);

  env.write_config(&single_check("exit 1"));
  let (code, third) = env.json_report(&["check"]);
  assert_eq!(code, 1);
  let failed = target(&third, "app.test");
  assert_eq!(failed["status"], "failed");
  assert_eq!(failed["exit_code"], 1);
  assert_ne!(failed["node"], target(&first, "app.test")["node"]);
}

#[test]
fn failures_are_rerun() {
  let env = app_env(&single_check("exit 3"));

  for _ in 0..2 {
    let (code, report) = env.json_report(&["check"]);
    assert_eq!(code, 1);
    assert_eq!(target(&report, "app.test")["exit_code"], 3);
  }
}

#[test]
fn source_edit_invalidates_check() {
  let env = app_env(&single_check("exit 0"));
  let (_, first) = env.json_report(&["check"]);

  env.write_file("app/main.txt", "hello, world\n");
  let (code, second) = env.json_report(&["check"]);
  assert_eq!(code, 0);
  assert_eq!(target(&second, "app.test")["status"], "passed");
  assert_ne!(target(&second, "app.test")["node"], target(&first, "app.test")["node"]);
}

#[test]
fn failing_check_does_not_stop_others() {
  let env = app_env(
    r#"{
      "projects": {
        "app": {
          "src": "app",
          "checks": [
            { "name": "bad", "command": "echo something broke; exit 2" },
            { "name": "good", "command": "exit 0" }
          ]
        }
      }
    }"#,
  );

  let (code, report) = env.json_report(&["check"]);
  assert_eq!(code, 1);
  assert_eq!(report["status"], "failed");
  assert_eq!(target(&report, "app.good")["status"], "passed");
  let bad = target(&report, "app.bad");
  assert_eq!(bad["exit_code"], 2);

  let log = std::fs::read_to_string(bad["log"].as_str().unwrap()).unwrap();
  assert!(log.contains("something broke"));
}

#[test]
fn text_output_points_at_failed_log() {
  let env = app_env(&single_check("exit 1"));
  env
    .kiln_cmd()
    .arg("check")
    .assert()
    .code(1)
    .stdout(predicate::str::contains("app.test"))
    .stdout(predicate::str::contains("exit code 1"))
    .stdout(predicate::str::contains(".log"));
}

#[test]
fn identical_checks_share_one_node() {
  let env = app_env(
    r#"{
      "projects": {
        "one": { "src": "app", "checks": [{ "name": "test", "command": "echo same" }] },
        "two": { "src": "app", "checks": [{ "name": "verify", "command": "echo same" }] }
      }
    }"#,
  );

  let (code, report) = env.json_report(&["check"]);
  assert_eq!(code, 0);
  let one = target(&report, "one.test");
  let two = target(&report, "two.verify");
  assert_eq!(one["node"], two["node"]);
  assert_eq!(one["status"], two["status"]);
}

#[test]
fn many_checks_run_concurrently_and_are_recorded_once() {
  let checks: Vec<_> = (0..12)
    .map(|i| {
      serde_json::json!({
        "name": format!("c{i}"),
        "command": format!("/bin/sleep 0.0{}; echo {i}", (i * 3) % 7),
      })
    })
    .collect();
  let config = serde_json::json!({ "projects": { "app": { "src": "app", "checks": checks } } });
  let env = app_env(&config.to_string());

  let (code, report) = env.json_report(&["--jobs", "4", "check"]);
  assert_eq!(code, 0);
  assert_eq!(report["counts"]["passed"], 12);

  // 12 checks plus the shared empty environment.
  let records: Vec<_> = std::fs::read_dir(env.store_path().join("results"))
    .unwrap()
    .map(|e| e.unwrap().path())
    .collect();
  assert_eq!(records.len(), 13);
  for path in &records {
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"), "stray file {}", path.display());
    let record: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert!(record["node"].is_string());
  }
}

#[test]
fn selecting_one_check_runs_only_that_check() {
  let env = app_env(
    r#"{
      "projects": {
        "app": {
          "src": "app",
          "checks": [
            { "name": "lint", "command": "exit 0" },
            { "name": "test", "command": "exit 1" }
          ]
        }
      }
    }"#,
  );

  let (code, report) = env.json_report(&["check", "app.lint"]);
  assert_eq!(code, 0);
  assert_eq!(report["targets"].as_array().unwrap().len(), 1);
  assert_eq!(target(&report, "app.lint")["status"], "passed");
}

#[test]
fn registered_tool_is_on_path() {
  let env = app_env(
    r#"{
      "tools": { "greet": "tools/greet" },
      "projects": {
        "app": {
          "src": "app",
          "dev_tools": ["greet"],
          "checks": [{ "name": "hello", "command": "greet" }]
        }
      }
    }"#,
  );
  env.write_file("tools/greet", "#!/bin/sh\necho greetings from the tool\n");
  let tool = env.path().join("tools/greet");
  std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

  let (code, report) = env.json_report(&["check"]);
  assert_eq!(code, 0, "{report}");
  let log = std::fs::read_to_string(target(&report, "app.hello")["log"].as_str().unwrap()).unwrap();
  assert!(log.contains("greetings from the tool"));
}

#[test]
fn host_tools_are_not_visible_by_default() {
  let env = app_env(&single_check("ls"));
  let (code, report) = env.json_report(&["check"]);
  assert_eq!(code, 1);
  assert_eq!(target(&report, "app.test")["status"], "failed");
}

#[test]
fn unknown_tool_aborts_before_running() {
  let env = app_env(
    r#"{
      "projects": {
        "app": { "src": "app", "dev_tools": ["missing-tool"], "checks": [{ "name": "t", "command": "exit 0" }] }
      }
    }"#,
  );

  env
    .kiln_cmd()
    .arg("check")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("missing-tool"));
  assert_eq!(std::fs::read_dir(env.store_path()).unwrap().count(), 0);
}

#[test]
fn timeout_cancels_the_run() {
  let env = app_env(&single_check("/bin/sleep 30"));

  let (code, report) = env.json_report(&["--timeout", "300ms", "check"]);
  assert_eq!(code, 1);
  assert_eq!(report["timed_out"], true);
  assert_eq!(report["status"], "cancelled");
  assert_eq!(target(&report, "app.test")["status"], "cancelled");
}
