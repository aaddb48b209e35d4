//! Broadcast service errors.

use thiserror::Error;

use onebridge_core::{ApiError, TransportError};

/// Errors raised by the broadcast service.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// A subscriber asked for a helper that is not exposed.
    #[error("unknown sdk path '{0}'")]
    UnknownPath(String),

    /// A subscriber request carried missing or mistyped arguments.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The forwarded gateway call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The listening endpoint could not be started.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<serde_json::Error> for BroadcastError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgs(err.to_string())
    }
}

/// Result type for broadcast operations.
pub type BroadcastResult<T> = Result<T, BroadcastError>;
