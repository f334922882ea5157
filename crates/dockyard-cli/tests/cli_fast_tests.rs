//! Fast CLI tests using assert_cmd.
//! These test the binary directly without needing a container engine.

#![allow(deprecated)] // assert_cmd::Command::cargo_bin is deprecated but works fine

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_flag() {
    Command::cargo_bin("dockyard")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Run and attach to containerized services"));
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("dockyard")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn test_subcommand_help() {
    for subcmd in &[
        "version", "install", "compat", "up", "run", "wait", "status", "logs", "rm", "prune",
        "config",
    ] {
        Command::cargo_bin("dockyard")
            .unwrap()
            .args([subcmd, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty().not());
    }
}

#[test]
fn test_unknown_subcommand_fails() {
    Command::cargo_bin("dockyard")
        .unwrap()
        .arg("nonexistent-subcommand")
        .assert()
        .failure();
}

#[test]
fn test_compat_dev_build_resolves_latest() {
    Command::cargo_bin("dockyard")
        .unwrap()
        .args(["compat", "srcd/gitbase", "--client-version", "dev"])
        .assert()
        .success()
        .stdout(predicate::str::diff("latest\n"));
}

#[test]
fn test_invalid_port_is_rejected() {
    Command::cargo_bin("dockyard")
        .unwrap()
        .args(["up", "db", "--image", "mysql:8", "--port", "not-a-port"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid port"));
}

#[test]
fn test_wait_times_out_on_closed_port() {
    let closed = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap()
    };
    Command::cargo_bin("dockyard")
        .unwrap()
        .args(["wait", &closed.to_string(), "--timeout", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("did not become ready"));
}

#[test]
fn test_config_uses_given_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[network]\nname = \"custom-net\"\n").unwrap();

    Command::cargo_bin("dockyard")
        .unwrap()
        .args(["config", "--config", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom-net"));
}

#[test]
fn test_broken_config_file_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[network\nname = ").unwrap();

    Command::cargo_bin("dockyard")
        .unwrap()
        .args(["config", "--config", path.to_str().unwrap()])
        .assert()
        .failure();
}
