//! Reference chat payload exchanged by clients through the relay.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// One chat line as sent by a client.
///
/// Encoded as a single JSON text frame:
/// `{"username":"alice","content":"hello"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub content: String,
}

impl ChatMessage {
    /// Creates a new chat message.
    pub fn new(username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            content: content.into(),
        }
    }

    /// Checks that both fields carry something worth sending.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.username.trim().is_empty() {
            return Err(ProtocolError::EmptyField { field: "username" });
        }
        if self.content.trim().is_empty() {
            return Err(ProtocolError::EmptyField { field: "content" });
        }
        Ok(())
    }

    /// Serializes the message to its JSON wire form.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parses a message from a JSON string.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Parses a message from raw frame bytes.
    pub fn from_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        let text = std::str::from_utf8(bytes)?;
        Self::from_json(text)
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.username, self.content)
    }
}
