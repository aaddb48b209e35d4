//! Unified error types for onebridge.
//!
//! Transport-level failures are handled locally by the connection layer
//! (reconnect, reject pending calls). Only the call-level kinds in
//! [`ApiError`] ever reach callers of an outbound call.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Dialing the remote endpoint failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The connection is closed and can no longer carry frames.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Binding a listening socket failed.
    #[error("failed to bind {addr}: {reason}")]
    BindFailed {
        /// The address that could not be bound.
        addr: String,
        /// Reason for failure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// Transport not available.
    #[error("transport '{transport}' not available")]
    NotAvailable {
        /// The transport type that's not available.
        transport: &'static str,
    },

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// Call-level error returned by outbound gateway calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No usable connection existed when the call was sent. Never retried
    /// automatically.
    #[error("channel closed: no open gateway connection")]
    ChannelClosed,

    /// The call deadline elapsed before a response arrived.
    #[error("call timed out")]
    Timeout,

    /// The connection carrying the call was lost before a response arrived.
    #[error("connection lost before a response arrived")]
    ConnectionLost,

    /// The gateway answered with a failure status.
    #[error("gateway error ({retcode}): {message}")]
    Failed {
        /// Gateway return code.
        retcode: i64,
        /// Gateway error message.
        message: String,
    },

    /// Failed to serialize a request or deserialize a response.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Whether a caller may reasonably retry the call.
    ///
    /// Only deadline expiry and connection loss qualify; a closed channel
    /// or a gateway-side failure will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionLost)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;
