//! Error types for the OTA safeguard system
//!
//! This module defines the error types used throughout the update engine.
//! The main error type is `OtaError`. Lower layers (hashing, verification,
//! snapshot storage) return it to their direct callers; only the update
//! engine's transaction boundary folds every variant into a report.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the OTA safeguard system
#[derive(Error, Debug)]
pub enum OtaError {
    /// I/O operation failed without path context, e.g. raised with `?` inside
    /// an [`UpdateStep`](crate::UpdateStep) implementation
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O operation on a specific path failed
    #[error("I/O error at '{}': {source}", path.display())]
    FileIo {
        /// The path the operation was working on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error (JSON): {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A runtime configuration problem, e.g. a signature check without a key
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Digest, size or signature verification did not pass
    #[error("Verification failed: {0}")]
    Verification(String),

    /// A package path resolves outside its root
    #[error("Path '{path}' escapes root '{}'", root.display())]
    PathTraversal {
        /// The offending relative path as declared.
        path: String,
        /// The root it had to stay inside.
        root: PathBuf,
    },

    /// Snapshot id is not known to the store
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// An update step reported failure or raised an error
    #[error("Update step '{step}' failed: {reason}")]
    StepFailed {
        /// Name of the failing step.
        step: String,
        /// What went wrong.
        reason: String,
    },

    /// Restoring the backup failed; the target may be in neither state
    #[error("Rollback failed: {0}")]
    RollbackFailure(String),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for operations that can fail with an [OtaError]
pub type Result<T> = std::result::Result<T, OtaError>;

impl OtaError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        OtaError::InvalidInput(msg.into())
    }

    /// Create a new verification failure
    pub fn verification<S: Into<String>>(msg: S) -> Self {
        OtaError::Verification(msg.into())
    }

    /// Create a new runtime configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        OtaError::Configuration(msg.into())
    }

    /// Wrap an I/O error with the path it occurred on
    pub fn file_io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        OtaError::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for I/O failures, with or without path context.
    pub fn is_io(&self) -> bool {
        matches!(self, OtaError::Io(_) | OtaError::FileIo { .. })
    }
}
