//! Error types for the line-mode client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use blab_protocol::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not open the WebSocket to the relay.
    ///
    /// Usually means the relay is not running or the URL is wrong.
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },

    /// The connection dropped while writing.
    #[error("Failed to send message: {0}")]
    Send(#[source] Box<tungstenite::Error>),

    /// The message could not be built or encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_names_url() {
        let err = ClientError::Connect {
            url: "ws://127.0.0.1:1/ws".to_string(),
            source: Box::new(tungstenite::Error::ConnectionClosed),
        };
        assert!(err.to_string().contains("ws://127.0.0.1:1/ws"));
    }

    #[test]
    fn test_protocol_error_is_transparent() {
        let err = ClientError::from(ProtocolError::EmptyField { field: "content" });
        assert_eq!(
            err.to_string(),
            ProtocolError::EmptyField { field: "content" }.to_string()
        );
    }
}
