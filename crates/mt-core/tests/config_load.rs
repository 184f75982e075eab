//! Configuration loading tests
//!
//! Loads configuration files from disk and derives the relay endpoints the
//! supervisor would dispatch.

use std::io::Write;

use mt_core::config::load_config;
use mt_core::error::ConfigError;
use mt_core::relay::{control_url, relay_url};
use mt_core::Protocol;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config");
    file
}

#[test]
fn test_scenario_single_tcp_mapping_without_key() {
    let file = write_config(
        r#"{
            "hostname": "host",
            "username": "user",
            "password": "pass",
            "mappings": [
                { "name": "rdp", "nodeName": "desk", "nodeId": "node1",
                  "protocol": 1, "localPort": 8080, "remotePort": 3389 }
            ]
        }"#,
    );

    let config = load_config(file.path()).unwrap();
    let mapping = &config.mappings[0];

    assert_eq!(control_url(&config.server.hostname).as_str(), "wss://host/control.ashx");
    assert_eq!(
        relay_url(&config.server.hostname, mapping).as_str(),
        "wss://host/meshrelay.ashx?nodeid=node1&tcpport=3389"
    );
    assert_eq!(mapping.dispatch_addr().to_string(), "127.0.0.1");
}

#[test]
fn test_scenario_udp_mapping_with_key_and_address() {
    let file = write_config(
        r#"{
            "hostname": "h?key=ABC",
            "username": "user",
            "password": "pass",
            "mappings": [
                { "name": "dns", "nodeName": "resolver", "nodeId": "node2",
                  "protocol": 2, "localPort": 5353, "remotePort": 53,
                  "remoteIP": "8.8.8.8" }
            ]
        }"#,
    );

    let config = load_config(file.path()).unwrap();
    let mapping = &config.mappings[0];

    assert_eq!(mapping.protocol, Protocol::Udp);
    assert_eq!(control_url(&config.server.hostname).as_str(), "wss://h/control.ashx?key=ABC");
    assert_eq!(
        relay_url(&config.server.hostname, mapping).as_str(),
        "wss://h/meshrelay.ashx?nodeid=node2&key=ABC&udpport=53&udpaddr=8.8.8.8"
    );
}

#[test]
fn test_scenario_missing_node_id() {
    let file = write_config(
        r#"{
            "hostname": "host",
            "username": "user",
            "password": "pass",
            "mappings": [
                { "name": "rdp", "nodeName": "desk",
                  "protocol": 1, "localPort": 8080, "remotePort": 3389 }
            ]
        }"#,
    );

    let err = load_config(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::MissingKey(ref key) if key == "nodeId"));
}

#[test]
fn test_server_fields_are_kept_verbatim() {
    let file = write_config(
        r#"{
            "hostname": "mesh.example.com:4443?key=k3y",
            "username": "  spaced user ",
            "password": "p@ss\"word",
            "certhash": "0A1B",
            "mappings": []
        }"#,
    );

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.server.hostname, "mesh.example.com:4443?key=k3y");
    assert_eq!(config.server.username, "  spaced user ");
    assert_eq!(config.server.password, "p@ss\"word");
    assert_eq!(config.server.cert_hash.as_deref(), Some("0A1B"));
    assert!(config.mappings.is_empty());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
