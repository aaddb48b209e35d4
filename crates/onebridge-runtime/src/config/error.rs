//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why the configuration could not be used. All of these are fatal at
/// startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file extension has no enabled format feature.
    #[error("Unsupported or disabled configuration file format: .{extension}")]
    UnsupportedFormat { extension: String },

    /// A source could not be parsed or did not fit the schema.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// A value is out of range or inconsistent with another.
    #[error("Invalid configuration: {message}")]
    ValidationError { message: String },

    /// A value required by the selected mode is empty.
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// The gateway URL is not a WebSocket URL.
    #[error("Invalid gateway URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A listening port is zero.
    #[error("Invalid port number for {field}: {port}")]
    InvalidPort { field: String, port: u16 },

    /// A WebSocket path does not start with `/`.
    #[error("Invalid path for {field}: '{path}' must start with '/'")]
    InvalidPath { field: String, path: String },
}

impl ConfigError {
    /// A [`ConfigError::ValidationError`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// A [`ConfigError::MissingField`].
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// A [`ConfigError::InvalidUrl`].
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
