#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// sandbox を使う設定ファイルを置いた作業ディレクトリ
struct TestProject {
    root: TempDir,
}

impl TestProject {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join("deployer.yaml"),
            "deployment: cli-test\nprovider: sandbox\nretry:\n  count: 5\n  delay_ms: 1\n",
        )
        .unwrap();
        Self { root }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("deployer").unwrap();
        cmd.current_dir(self.root.path())
            .env("DEPLOYER_CONFIG_PATH", self.root.path().join("deployer.yaml"))
            .env_remove("DEPLOYER_DEPLOYMENT")
            .env_remove("DEPLOYER_PROVIDER")
            .env_remove("RUST_LOG");
        cmd
    }
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("deployer").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("datacenter"))
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::contains("lb"))
        .stdout(predicate::str::contains("service"))
        .stdout(predicate::str::contains("teardown"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("deployer").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("deployer"));
}

/// service provision のヘルプにオプションが出ることを確認
#[test]
fn test_service_provision_help() {
    let mut cmd = Command::cargo_bin("deployer").unwrap();
    cmd.args(["service", "provision", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--image"))
        .stdout(predicate::str::contains("--playbook"))
        .stdout(predicate::str::contains("--load-balancer"));
}

#[test]
fn test_datacenter_list_empty() {
    let project = TestProject::new();
    project
        .cmd()
        .args(["datacenter", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cli-test"));
}

#[test]
fn test_datacenter_provision_json() {
    let project = TestProject::new();
    project
        .cmd()
        .args(["--json", "datacenter", "provision", "dc-a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"dc-a\""))
        .stdout(predicate::str::contains("10.0.0.0/16"));
}

#[test]
fn test_datacenter_provision_with_prefix() {
    let project = TestProject::new();
    project
        .cmd()
        .args([
            "--json",
            "datacenter",
            "provision",
            "dc-a",
            "--prefix",
            "20",
            "--include",
            "172.16.0.0/12",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("172.16.0.0/20"));
}

#[test]
fn test_network_provision() {
    let project = TestProject::new();
    project
        .cmd()
        .args(["network", "provision", "dc-a.public"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dc-a.public"));
}

/// `<datacenter>.<network>` でない名前はパース時点で弾く
#[test]
fn test_network_invalid_name() {
    let project = TestProject::new();
    project
        .cmd()
        .args(["network", "provision", "public"])
        .assert()
        .failure();
}

#[test]
fn test_instance_type_conflicts_with_requirements() {
    let project = TestProject::new();
    project
        .cmd()
        .args([
            "service",
            "provision",
            "dc-a.app",
            "--image",
            "ami-12345678",
            "--instance-type",
            "t2.micro",
            "--cpus",
            "2",
        ])
        .assert()
        .failure();
}

#[test]
fn test_teardown_empty_deployment() {
    let project = TestProject::new();
    project
        .cmd()
        .args(["teardown", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("削除完了"));
}

#[test]
fn test_teardown_json_requires_yes() {
    let project = TestProject::new();
    project
        .cmd()
        .args(["--json", "teardown"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn test_config_json_reflects_overrides() {
    let project = TestProject::new();
    project
        .cmd()
        .args(["--json", "--deployment", "staging", "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"deployment\": \"staging\""))
        .stdout(predicate::str::contains("\"provider\": \"sandbox\""));
}

#[test]
fn test_invalid_config_file() {
    let project = TestProject::new();
    fs::write(
        project.root.path().join("deployer.yaml"),
        "retry:\n  count: 0\n",
    )
    .unwrap();
    project.cmd().arg("config").assert().failure();
}

#[cfg(not(feature = "aws-cloud"))]
#[test]
fn test_aws_requires_feature() {
    let project = TestProject::new();
    project
        .cmd()
        .args(["--provider", "aws", "datacenter", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("aws-cloud"));
}
