//! Error types for configuration handling
//!
//! This module defines error types related to configuration loading, parsing,
//! and validation. The main error type is `ConfigError`.

use thiserror::Error;

/// Errors that can occur during configuration loading, parsing, and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error parsing the configuration file (invalid TOML).
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Missing required configuration value.
    #[error("Missing required configuration: {0}")]
    MissingValue(String),

    /// Invalid configuration value.
    #[error("Invalid value for '{field}': '{value}'. {reason}")]
    InvalidValue {
        /// The name of the field that has an invalid value.
        field: String,
        /// The invalid value.
        value: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// Configuration file could not be read.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl ConfigError {
    /// Creates a new invalid value error.
    pub fn invalid_value<S1, S2, S3>(field: S1, value: S2, reason: S3) -> Self
    where
        S1: Into<String>,
        S2: std::fmt::Display,
        S3: Into<String>,
    {
        ConfigError::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a new missing value error.
    pub fn missing_value<S: Into<String>>(field: S) -> Self {
        ConfigError::MissingValue(field.into())
    }

    /// Creates a new validation error.
    pub fn validation_error<S: Into<String>>(message: S) -> Self {
        ConfigError::ValidationError(message.into())
    }

    /// Creates a new file not found error.
    pub fn file_not_found<S: Into<String>>(path: S) -> Self {
        ConfigError::FileNotFound(path.into())
    }
}
