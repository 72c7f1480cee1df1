//! Configuration validation for the OTA safeguard system
//!
//! This module contains functions for validating the configuration to ensure
//! all values are within acceptable ranges and consistent with each other.

use std::path::{Component, Path};

use super::error::ConfigError;
use super::{Config, EngineConfig, HashingConfig, SnapshotConfig};

/// Smallest accepted hashing buffer
pub const MIN_CHUNK_SIZE: usize = 1;
/// Largest accepted hashing buffer (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Validates the whole configuration.
///
/// # Errors
///
/// Returns a `ConfigError` for the first check that fails.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_snapshot_config(&config.snapshot)?;
    validate_hashing_config(&config.hashing)?;
    Ok(())
}

fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.package_root.as_os_str().is_empty() {
        return Err(ConfigError::invalid_value(
            "engine.package_root",
            "",
            "Package root cannot be empty",
        ));
    }

    if !is_plain_component(&config.backup_slot) {
        return Err(ConfigError::invalid_value(
            "engine.backup_slot",
            &config.backup_slot,
            "Backup slot must be a single non-empty path component",
        ));
    }

    if config.require_signature && config.public_key_path.is_none() {
        return Err(ConfigError::missing_value(
            "engine.public_key_path (required when engine.require_signature is true)",
        ));
    }

    Ok(())
}

fn validate_snapshot_config(config: &SnapshotConfig) -> Result<(), ConfigError> {
    if config.backup_root.as_os_str().is_empty() {
        return Err(ConfigError::invalid_value(
            "snapshot.backup_root",
            "",
            "Backup root cannot be empty",
        ));
    }

    if config.keep_count == 0 {
        return Err(ConfigError::invalid_value(
            "snapshot.keep_count",
            config.keep_count,
            "keep_count must be greater than 0",
        ));
    }

    if config.backup_root.is_relative() {
        log::warn!(
            "snapshot.backup_root '{}' is relative; it resolves against the working directory",
            config.backup_root.display()
        );
    }

    Ok(())
}

fn validate_hashing_config(config: &HashingConfig) -> Result<(), ConfigError> {
    if config.chunk_size < MIN_CHUNK_SIZE || config.chunk_size > MAX_CHUNK_SIZE {
        return Err(ConfigError::invalid_value(
            "hashing.chunk_size",
            config.chunk_size,
            format!(
                "Chunk size must be between {} and {} bytes",
                MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            ),
        ));
    }
    Ok(())
}

/// Returns `true` if `name` is exactly one normal path component.
pub(crate) fn is_plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(|c: char| c == '/' || c == '\\')
}
