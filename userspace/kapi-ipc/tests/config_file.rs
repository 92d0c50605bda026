// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Config file loading (read, parse, validate) from disk

use std::fs;
use std::path::PathBuf;

use kapi_ipc::{ConfigError, KapiConfig};

#[test]
fn loads_full_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kapi.toml");
    fs::write(
        &path,
        r#"
[channel]
ring_capacity = 256
max_datagram = 8192
sync_timeout_ms = 1500

[socket]
caller_path = "/tmp/kapi-caller.sock"
worker_path = "/tmp/kapi-worker.sock"

[worker]
driver = "emulated"
device_memory = 1048576
host_region = 65536
"#,
    )
    .unwrap();

    let config = KapiConfig::load(&path).unwrap();
    assert_eq!(config.channel.ring_capacity, 256);
    assert_eq!(config.channel.max_datagram, 8192);
    assert_eq!(config.channel.sync_timeout_ms, 1500);
    assert_eq!(config.socket.worker_path, PathBuf::from("/tmp/kapi-worker.sock"));
    assert_eq!(config.worker.device_memory, 1 << 20);
    assert_eq!(config.worker.host_region, 1 << 16);
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = KapiConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn bad_toml_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kapi.toml");
    fs::write(&path, "[channel\nring_capacity = 4").unwrap();
    let err = KapiConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("kapi.toml"));
}

#[test]
fn same_socket_paths_are_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kapi.toml");
    fs::write(&path, "[socket]\ncaller_path = \"/tmp/a\"\nworker_path = \"/tmp/a\"\n").unwrap();
    assert!(matches!(KapiConfig::load(&path), Err(ConfigError::Invalid(_))));
}
