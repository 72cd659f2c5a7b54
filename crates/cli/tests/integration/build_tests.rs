use super::common::{TestEnv, target};

const BUILD_CONFIG: &str = r#"{
  "projects": {
    "site": {
      "src": "site",
      "build": "read -r line < index.txt; echo \"built: $line\" > \"$out/index.txt\"",
      "checks": [{ "name": "test", "command": "exit 0" }]
    }
  }
}"#;

#[test]
fn build_publishes_output_and_caches() {
  let env = TestEnv::new(BUILD_CONFIG);
  env.write_file("site/index.txt", "home\n");

  let (code, report) = env.json_report(&["build"]);
  assert_eq!(code, 0, "{report}");
  let site = target(&report, "site");
  assert_eq!(site["status"], "passed");
  assert_eq!(site["kind"], "build");
  assert_eq!(report["targets"].as_array().unwrap().len(), 1, "checks are not selected");

  let builds: Vec<_> = std::fs::read_dir(env.store_path().join("build"))
    .unwrap()
    .filter_map(Result::ok)
    .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
    .collect();
  assert_eq!(builds.len(), 1);
  let output = std::fs::read_to_string(builds[0].path().join("index.txt")).unwrap();
  assert_eq!(output, "built: home\n");

  let (code, again) = env.json_report(&["build"]);
  assert_eq!(code, 0);
  assert_eq!(target(&again, "site")["status"], "cached");
}

#[test]
fn tampered_output_is_rebuilt() {
  let env = TestEnv::new(BUILD_CONFIG);
  env.write_file("site/index.txt", "home\n");
  env.json_report(&["build"]);

  let build_dir = std::fs::read_dir(env.store_path().join("build"))
    .unwrap()
    .filter_map(Result::ok)
    .find(|e| !e.file_name().to_string_lossy().starts_with('.'))
    .unwrap()
    .path();
  std::fs::write(build_dir.join("index.txt"), "tampered").unwrap();

  let (code, report) = env.json_report(&["build"]);
  assert_eq!(code, 0, "{report}");
  assert_eq!(target(&report, "site")["status"], "passed");
  assert_eq!(
    std::fs::read_to_string(build_dir.join("index.txt")).unwrap(),
    "built: home\n"
  );
}

#[test]
fn failing_build_reports_exit_code() {
  let env = TestEnv::new(r#"{ "projects": { "site": { "src": "site", "build": "exit 7" } } }"#);
  env.write_file("site/index.txt", "home\n");

  let (code, report) = env.json_report(&["build", "site"]);
  assert_eq!(code, 1);
  assert_eq!(target(&report, "site")["exit_code"], 7);
}
