//! Inbound frame errors.

use thiserror::Error;

/// Why an inbound frame could not be classified.
///
/// Always logged and dropped; never propagated to callers and never stops
/// dispatch.
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The frame is JSON but neither a response nor a known event.
    #[error("unrecognized frame shape: {0}")]
    UnrecognizedShape(String),

    /// The frame names an event category that does not parse into its type.
    #[error("malformed {post_type} event: {reason}")]
    MalformedEvent {
        /// The `post_type` discriminant.
        post_type: String,
        /// Deserialization failure.
        reason: String,
    },
}

/// Result type for frame parsing.
pub type FrameResult<T> = Result<T, FrameError>;
