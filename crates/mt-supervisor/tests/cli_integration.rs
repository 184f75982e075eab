//! CLI integration tests
//!
//! Tests the mesh-tunnel binary using assert_cmd. Only paths that end before
//! any network activity are exercised here.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn mesh_tunnel() -> Command {
    Command::cargo_bin("mesh-tunnel")
        .expect("Failed to locate mesh-tunnel binary - ensure it's built before running tests")
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config");
    file
}

#[test]
fn test_cli_help() {
    mesh_tunnel()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mesh-tunnel"))
        .stdout(predicate::str::contains("configuration file"));
}

#[test]
fn test_cli_version() {
    mesh_tunnel()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mesh-tunnel"));
}

#[test]
fn test_cli_requires_config_path() {
    mesh_tunnel().assert().failure();
}

#[test]
fn test_cli_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    mesh_tunnel()
        .arg(dir.path().join("absent.json"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config"));
}

#[test]
fn test_cli_malformed_config() {
    let file = config_file("{ \"hostname\": ");
    mesh_tunnel()
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid configuration file"));
}

#[test]
fn test_cli_mapping_missing_node_id() {
    let file = config_file(
        r#"{
            "hostname": "127.0.0.1:1",
            "username": "user",
            "password": "pass",
            "mappings": [
                { "name": "rdp", "nodeName": "desk",
                  "protocol": 1, "localPort": 8080, "remotePort": 3389 }
            ]
        }"#,
    );

    mesh_tunnel()
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Missing required configuration key: nodeId"));
}

#[test]
fn test_cli_port_out_of_range() {
    let file = config_file(
        r#"{
            "hostname": "127.0.0.1:1",
            "username": "user",
            "password": "pass",
            "mappings": [
                { "name": "rdp", "nodeName": "desk", "nodeId": "n1",
                  "protocol": 1, "localPort": 70000, "remotePort": 3389 }
            ]
        }"#,
    );

    mesh_tunnel()
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid localPort in mapping: 70000"));
}

#[test]
fn test_cli_mapping_empty_node_id() {
    let file = config_file(
        r#"{
            "hostname": "127.0.0.1:1",
            "username": "user",
            "password": "pass",
            "mappings": [
                { "name": "rdp", "nodeName": "desk", "nodeId": "",
                  "protocol": 1, "localPort": 8080, "remotePort": 3389 }
            ]
        }"#,
    );

    mesh_tunnel()
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Empty value for configuration key: nodeId"));
}
