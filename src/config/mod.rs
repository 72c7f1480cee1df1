//! Configuration management for the OTA safeguard system
//!
//! This module handles loading, validating, and providing access to the
//! engine configuration. It supports loading configuration from a TOML file,
//! environment variable overrides, and programmatic construction.

#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod validation;

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod validation_tests;

#[cfg(test)]
#[path = "tests/config_mod_tests.rs"]
mod config_mod_tests;

use std::{
    env,
    fs,
    path::{Path, PathBuf},
};
use directories::ProjectDirs;

use serde::{Deserialize, Serialize};

use crate::types::{LogLevel, LogTarget};

/// Re-export the error type
pub use error::ConfigError;

/// The environment variable prefix for configuration overrides
const ENV_PREFIX: &str = "OTA_";

/// The application name used for finding config directories
const APP_NAME: &str = "ota-safeguard";

/// Config file looked up by [`crate::init`] when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "./ota-safeguard.toml";

/// Snapshot id the engine reuses for every transaction backup
pub const DEFAULT_BACKUP_SLOT: &str = "ota_transaction_backup";

/// Main configuration structure for the OTA safeguard system.
///
/// # Example
///
/// ```no_run
/// use ota_safeguard::config::Config;
///
/// // A missing file falls back to defaults.
/// let config = Config::load("path/that/hopefully/does/not/exist.toml").unwrap();
/// assert!(!config.engine.require_signature);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Update engine behaviour
    pub engine: EngineConfig,

    /// Snapshot store configuration
    pub snapshot: SnapshotConfig,

    /// File hashing configuration
    pub hashing: HashingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Update engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Directory holding one sub-directory per package, named by package id
    pub package_root: PathBuf,
    /// Snapshot id used for the per-transaction backup
    pub backup_slot: String,
    /// Whether every package must carry a valid detached signature
    pub require_signature: bool,
    /// PEM public key used for signature checks
    pub public_key_path: Option<PathBuf>,
    /// Whether declared file sizes must also match (off: the digest alone decides)
    pub check_declared_size: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            package_root: PathBuf::from("."),
            backup_slot: DEFAULT_BACKUP_SLOT.to_string(),
            require_signature: false,
            public_key_path: None,
            check_declared_size: false,
        }
    }
}

/// Snapshot store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SnapshotConfig {
    /// Directory where snapshot copies are kept
    pub backup_root: PathBuf,
    /// Whether the snapshot index is written to `snapshot_index.json`
    pub persist_index: bool,
    /// Number of snapshots kept by [`crate::core::DirectorySnapshotStore::apply_retention`]
    pub keep_count: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            backup_root: env::temp_dir().join("ota_backups"),
            persist_index: false,
            keep_count: 5,
        }
    }
}

/// File hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HashingConfig {
    /// Read buffer size in bytes
    pub chunk_size: usize,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::core::hash::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Stream log lines are written to
    pub target: LogTarget,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            target: LogTarget::Stderr,
        }
    }
}

impl Config {
    /// Loads the configuration from the specified path.
    ///
    /// The configuration is assembled in the following order:
    /// 1. From the file at `path`, or built-in defaults if it does not exist
    /// 2. Environment variables with the `OTA_` prefix
    /// 3. Validation
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, if an
    /// environment override cannot be parsed, or if validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let mut config = match fs::read_to_string(path) {
            Ok(config_str) => toml::from_str::<Config>(&config_str)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Config file not found at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                return Err(ConfigError::file_not_found(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        config.apply_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Environment variables are prefixed with `OTA_` and use `_` as a
    /// separator, e.g. `OTA_LOGGING_LEVEL=debug`.
    ///
    /// # Errors
    ///
    /// Returns an error if any recognised environment variable cannot be parsed.
    pub fn apply_env_vars(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }

            match stripped.to_lowercase().as_str() {
                "logging_level" => {
                    self.logging.level = value.parse().map_err(|_| {
                        ConfigError::invalid_value("logging.level", &value, "Invalid log level")
                    })?;
                }
                "snapshot_backup_root" => {
                    self.snapshot.backup_root = PathBuf::from(value.trim());
                }
                "engine_package_root" => {
                    self.engine.package_root = PathBuf::from(value.trim());
                }
                "engine_require_signature" => {
                    self.engine.require_signature = value.trim().parse().map_err(|_| {
                        ConfigError::invalid_value(
                            "engine.require_signature",
                            &value,
                            "Expected 'true' or 'false'",
                        )
                    })?;
                }
                "hashing_chunk_size" => {
                    self.hashing.chunk_size = value.trim().parse().map_err(|_| {
                        ConfigError::invalid_value("hashing.chunk_size", &value, "Expected a byte count")
                    })?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_config(self)
    }

    /// Returns the path to the directory where configuration files should be stored.
    ///
    /// This is OS-specific:
    /// - Linux: `$HOME/.config/ota-safeguard`
    /// - macOS: `$HOME/Library/Application Support/com.cogs.ota-safeguard`
    /// - Windows: `%APPDATA%\\cogs\\ota-safeguard`
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "cogs", APP_NAME)
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
    }
}
