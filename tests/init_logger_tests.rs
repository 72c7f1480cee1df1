#![cfg(feature = "logging")]

use ota_safeguard::config::Config;
use ota_safeguard::{init, OtaError};
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

#[test]
#[serial]
fn test_init_fails_when_logger_already_set() {
    // Pre-initialize logger
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempdir().unwrap();
    let config_path = dir.path().join("cfg.toml");
    let mut cfg = Config::default();
    cfg.snapshot.backup_root = dir.path().join("backups");
    fs::write(&config_path, toml::to_string(&cfg).unwrap()).unwrap();

    let result = init(Some(config_path.to_str().unwrap()));
    assert!(matches!(result, Err(OtaError::InvalidInput(_))));
}

#[test]
#[serial]
fn test_init_reports_invalid_config_before_logger() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("cfg.toml");
    fs::write(&config_path, "[hashing]\nchunk_size = 0\n").unwrap();

    let result = init(Some(config_path.to_str().unwrap()));
    assert!(matches!(result, Err(OtaError::Config(_))));
}
