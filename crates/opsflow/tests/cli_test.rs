#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

const ECHO_OPERATION: &str = r#"
operation:
  id: echo-hello
  name: Say hello
  type: management/tag
  capability: management
  operation_mode: create
  target:
    name: ${NAME}
    resource_group: ${RESOURCE_GROUP}
steps:
  - name: greet
    command: [echo, "hello ${NAME}"]
rollback:
  - name: farewell
    command: [echo, bye]
"#;

const FAILING_OPERATION: &str = r#"
operation:
  id: always-fails
  name: Always fails
  type: storage/account
steps:
  - name: create-X
    command: [echo, X]
  - name: create-Y
    command: [sh, -c, "exit 3"]
rollback:
  - name: delete-X
    command: [echo, delete X]
"#;

fn operation_id(stdout: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("操作ID: "))
        .map(|id| id.trim().to_string())
        .unwrap_or_else(|| panic!("no operation id in output:\n{stdout}"))
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("ops").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("宣言的なクラウド運用"))
        .stdout(predicate::str::contains("execute"))
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("invalidate-cache"))
        .stdout(predicate::str::contains("reconcile"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("ops").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("opsflow"));
}

#[test]
fn test_execute_help() {
    let mut cmd = Command::cargo_bin("ops").unwrap();
    cmd.arg("execute")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--force"))
        .stdout(predicate::str::contains("--var"));
}

#[test]
fn test_dry_run_conflicts_with_force() {
    let project = TestProject::new();
    let path = project.write_definition("echo", ECHO_OPERATION);
    project
        .ops()
        .arg("execute")
        .arg(&path)
        .args(["--dry-run", "--force"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("ops").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_validate_valid_catalog() {
    let project = TestProject::new();
    project.write_definition("echo", ECHO_OPERATION);
    project.write_definition("fails", FAILING_OPERATION);

    project
        .ops()
        .arg("validate")
        .arg(project.path().join("operations"))
        .assert()
        .success()
        .stdout(predicate::str::contains("操作: 2個"))
        .stdout(predicate::str::contains("操作定義は正常です"));
}

#[test]
fn test_validate_reports_problems() {
    let project = TestProject::new();
    project.write_definition(
        "broken",
        "operation:\n  id: broken\n  name: Broken\n  type: x/y\n  operation_mode: explode\n  requires: [ghost]\nsteps: []\n",
    );

    project
        .ops()
        .arg("validate")
        .arg(project.path().join("operations"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("broken.yaml"));
}

#[test]
fn test_validate_missing_path() {
    let project = TestProject::new();
    project
        .ops()
        .arg("validate")
        .arg(project.path().join("nope"))
        .assert()
        .failure();
}

#[test]
fn test_execute_dry_run_shows_plan_without_running() {
    let project = TestProject::new();
    let path = project.write_definition("echo", ECHO_OPERATION);

    project
        .ops()
        .arg("execute")
        .arg(&path)
        .arg("--dry-run")
        .args(["--var", "NAME=world; rm -rf /"])
        .assert()
        .success()
        .stdout(predicate::str::contains("操作ID: echo-hello-"))
        .stdout(predicate::str::contains("echo 'hello world; rm -rf /'"))
        .stdout(predicate::str::contains("ドライラン完了"));
}

#[test]
fn test_execute_success_then_status_and_show() {
    let project = TestProject::new();
    let path = project.write_definition("echo", ECHO_OPERATION);

    let output = project
        .ops()
        .arg("execute")
        .arg(&path)
        .args(["--var", "NAME=world"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);
    let id = operation_id(&output.stdout);

    project
        .ops()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("completed: 1"))
        .stdout(predicate::str::contains("management/tag 1"));

    project
        .ops()
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("operation completed"));
}

#[test]
fn test_execute_failure_rolls_back_and_exits_non_zero() {
    let project = TestProject::new();
    let path = project.write_definition("fails", FAILING_OPERATION);

    let output = project.ops().arg("execute").arg(&path).output().unwrap();
    assert!(!output.status.success());
    let id = operation_id(&output.stdout);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("操作が失敗しました"), "{stderr}");
    assert!(stderr.contains("create-Y"), "{stderr}");

    let script = project
        .path()
        .join(".opsflow/rollback")
        .join(format!("{id}.sh"));
    let content = std::fs::read_to_string(script).unwrap();
    assert!(content.contains("'echo' 'delete X'"));

    project
        .ops()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("failed:    1"));
}

#[test]
fn test_execute_unresolved_variable_fails() {
    let project = TestProject::new();
    let path = project.write_definition("echo", ECHO_OPERATION);

    project
        .ops()
        .arg("execute")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("NAME"));
}

#[test]
fn test_show_unknown_operation() {
    let project = TestProject::new();
    project
        .ops()
        .args(["show", "does-not-exist"])
        .assert()
        .failure();
}

#[test]
fn test_reconcile_and_purge_on_empty_state() {
    let project = TestProject::new();
    project
        .ops()
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("放置された操作はありません"));

    project
        .ops()
        .arg("purge")
        .assert()
        .success();
}

#[test]
fn test_reconcile_rejects_unbounded_window() {
    let project = TestProject::new();
    project
        .ops()
        .args(["reconcile", "--stale-after", "10000000000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--stale-after"));

    project
        .ops()
        .args(["reconcile", "--stale-after", "3600"])
        .assert()
        .success();
}

#[test]
fn test_out_of_range_config_is_reported() {
    let project = TestProject::new();
    std::fs::write(
        project.path().join("opsflow.yaml"),
        "locks:\n  lease_secs: 18446744073709551615\n",
    )
    .unwrap();

    project
        .ops()
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("locks.lease_secs"));
}

#[test]
fn test_invalidate_cache() {
    let project = TestProject::new();
    project
        .ops()
        .args(["invalidate-cache", "compute/*", "manual refresh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("compute/*"));
}

#[test]
fn test_discover_offline_writes_exports() {
    let project = TestProject::new();
    project
        .ops()
        .args(["discover", "rg-test", "--offline", "--output", "out"])
        .assert()
        .success();

    for file in ["summary.md", "graph.json", "graph.dot"] {
        assert!(project.path().join("out").join(file).exists());
    }
}
