//! Protocol error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur while encoding or decoding chat payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload was not valid UTF-8
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Payload was not a valid chat message
    #[error("Failed to decode chat message: {0}")]
    Decode(#[source] serde_json::Error),

    /// Chat message could not be serialized
    #[error("Failed to encode chat message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A required field was empty
    #[error("Field '{field}' must not be empty")]
    EmptyField { field: &'static str },
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
