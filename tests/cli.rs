// ABOUTME: Integration tests for the pdo CLI commands.
// ABOUTME: Validates --help output, init, and record commands against a temp state dir.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const DIGEST: &str = "sha256:4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945";

fn pdo_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("pdo"))
}

/// A directory with a config whose driver commands all succeed.
fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("pdo.yml"),
        r#"
service: checkout
driver:
  apply: "true"
  wait_ready: "true"
  set_traffic: "true"
  traffic_status: "echo '{\"stable\": 100, \"candidate\": 0}'"
  decommission: "true"
metrics:
  url: http://127.0.0.1:9
  error_rate_query: 'errors'
  latency_p95_query: 'p95'
smoke:
  base_url: "http://127.0.0.1:9"
  checks:
    - /healthz
"#,
    )
    .unwrap();
    dir
}

#[test]
fn help_shows_commands() {
    pdo_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("abort"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("retry-rollback"));
}

#[test]
fn init_creates_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("pdo.yml");

    pdo_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--service", "checkout"])
        .assert()
        .success();

    assert!(config_path.exists(), "pdo.yml should be created");
    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("service: checkout"));
    assert!(content.contains("soak_window:"));
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("pdo.yml");

    fs::write(&config_path, "existing: config").unwrap();

    pdo_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn commands_fail_without_config() {
    let temp_dir = tempfile::tempdir().unwrap();

    pdo_cmd()
        .current_dir(temp_dir.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn deploy_rejects_a_tag() {
    let dir = project();

    pdo_cmd()
        .current_dir(dir.path())
        .args(["deploy", "checkout:latest"])
        .assert()
        .failure();
}

#[test]
fn deploy_without_stable_variant_asks_for_adopt() {
    let dir = project();

    pdo_cmd()
        .current_dir(dir.path())
        .args(["deploy", DIGEST])
        .assert()
        .failure()
        .stderr(predicate::str::contains("adopt"));
}

#[test]
fn adopt_then_status_lists_the_baseline() {
    let dir = project();

    pdo_cmd()
        .current_dir(dir.path())
        .args(["adopt", DIGEST, "--color", "green"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Adopted"));

    pdo_cmd()
        .current_dir(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("checkout"))
        .stdout(predicate::str::contains("completed"));

    pdo_cmd()
        .current_dir(dir.path())
        .args(["--json", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"completed\""));
}

#[test]
fn redeploying_the_adopted_digest_is_a_no_op() {
    let dir = project();

    pdo_cmd()
        .current_dir(dir.path())
        .args(["adopt", DIGEST])
        .assert()
        .success();

    pdo_cmd()
        .current_dir(dir.path())
        .args(["--quiet", "deploy", DIGEST])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));
}

#[test]
fn unknown_deployment_is_not_found() {
    let dir = project();

    pdo_cmd()
        .current_dir(dir.path())
        .args(["abort", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn resume_with_nothing_pending_succeeds() {
    let dir = project();

    pdo_cmd()
        .current_dir(dir.path())
        .arg("resume")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to resume"));
}

#[test]
fn prune_accepts_humantime_durations() {
    let dir = project();

    pdo_cmd()
        .current_dir(dir.path())
        .args(["prune", "--older-than", "7d"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pruned 0"));

    pdo_cmd()
        .current_dir(dir.path())
        .args(["prune", "--older-than", "soon"])
        .assert()
        .failure();
}
