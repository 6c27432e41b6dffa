//! blabber relay - connection registry and fan-out router
//!
//! This crate provides the core infrastructure of the relay:
//! - `registry` - Actor that owns the set of live connections
//! - `router` - Single dispatch loop that fans every message out
//! - `server` - TCP accept loop, WebSocket upgrade and per-connection read loops
//! - `peer` - Send-side connection handles shared by registry and router
//! - `config` - Layered settings (defaults, TOML file, environment, CLI)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        blabd relay                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐ publish ┌──────────────────────────┐   │
//! │  │ConnectionHandler│────────▶│  Router (one consumer)   │   │
//! │  │ (N read loops)  │         │  bounded FIFO queue      │   │
//! │  └────────┬────────┘         └────────────┬─────────────┘   │
//! │           │ register/                     │ snapshot +      │
//! │           │ unregister                    │ send to peers   │
//! │           ▼                               ▼                 │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │          RegistryActor (connection set owner)         │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod cli;
pub mod config;
pub mod peer;
pub mod registry;
pub mod router;
pub mod server;
