//! blab - line-mode client for the blabber relay
//!
//! - `client` - One WebSocket connection: send chat lines, receive frames in order
//! - `log` - Append-only log of received messages
//! - `cli` - The `blabber` command

pub mod cli;
pub mod client;
pub mod error;
pub mod log;

pub use client::{ChatClient, Incoming};
pub use error::{ClientError, Result};
pub use log::{LogEntry, MessageLog};
