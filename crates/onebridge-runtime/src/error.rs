//! Runtime error types.

use thiserror::Error;

use onebridge_broadcast::BroadcastError;
use onebridge_core::TransportError;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The gateway connection could not be started.
    #[error("Gateway transport error: {0}")]
    Transport(#[from] TransportError),

    /// The broadcast endpoint could not be started.
    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    /// Signal handlers could not be installed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
