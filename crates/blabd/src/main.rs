//! blabd - WebSocket fan-out relay
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:8080)
//! blabd
//!
//! # Custom address, no echo to the sender
//! blabd --listen 127.0.0.1:9000 --no-echo
//!
//! # Enable debug logging
//! RUST_LOG=blabd=debug blabd
//! ```

fn main() -> anyhow::Result<()> {
    blabd::cli::run()
}
