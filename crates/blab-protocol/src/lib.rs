//! blabber protocol - wire constants and the reference chat payload
//!
//! The relay treats every frame as opaque bytes. This crate only pins down
//! where the relay listens and the `{username, content}` JSON shape that
//! the bundled client speaks.

pub mod error;
pub mod message;

pub use error::{ProtocolError, ProtocolResult};
pub use message::ChatMessage;

/// HTTP path that accepts the WebSocket upgrade.
pub const WS_PATH: &str = "/ws";

/// Default TCP port of the relay.
pub const DEFAULT_PORT: u16 = 8080;

/// Builds the WebSocket URL for a relay reachable at `host:port`.
pub fn server_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}{WS_PATH}")
}

/// URL of a relay running on the local machine with the default port.
pub fn default_server_url() -> String {
    server_url("127.0.0.1", DEFAULT_PORT)
}
