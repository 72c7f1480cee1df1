// src/lib.rs

//! Transactional over-the-air update engine.
//!
//! An update is applied to a target directory tree in one transaction:
//! the tree is backed up into a [`core::SnapshotStore`], every package file is
//! checked against its manifest digest (and optionally the manifest against a
//! detached RSA-PSS signature), the registered [`core::UpdateStep`]s run in
//! order, and the backup is either discarded on success or restored on any
//! failure.

pub mod config;
pub mod core;
pub mod error;
pub mod manifest;
pub mod types;
pub mod vehicle;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::core::{
    DirectorySnapshotStore, FileEntry, FnStep, Hasher, InstallFilesStep, PackageDescriptor,
    SnapshotRecord, SnapshotStore, StepContext, TransactionOutcome, TransactionPhase,
    UpdateEngine, UpdateEngineBuilder, UpdateReport, UpdateStep, Verifier,
};
pub use error::{OtaError, Result};
pub use types::LogLevel;
pub use vehicle::VehicleState;

/// Loads configuration and installs the process logger.
///
/// `config_path` of `None` falls back to `./ota-safeguard.toml`; a missing
/// file yields the defaults. The logger level comes from `logging.level`.
///
/// # Errors
///
/// Returns [`OtaError::Config`] if the file cannot be read, parsed or
/// validated, and [`OtaError::InvalidInput`] if a logger is already set.
#[cfg(feature = "logging")]
pub fn init(config_path: Option<&str>) -> Result<config::Config> {
    let path = config_path.unwrap_or(config::DEFAULT_CONFIG_FILE);
    let config = config::Config::load(path)?;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.logging.level.to_level_filter());
    builder.target(match config.logging.target {
        types::LogTarget::Stderr => env_logger::Target::Stderr,
        types::LogTarget::Stdout => env_logger::Target::Stdout,
    });
    builder
        .try_init()
        .map_err(|e| OtaError::invalid_input(format!("Logger already initialized: {}", e)))?;

    log::debug!("ota-safeguard initialised from {}", path);
    Ok(config)
}
