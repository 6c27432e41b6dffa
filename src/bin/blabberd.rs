//! blabberd - WebSocket fan-out relay
//!
//! ```bash
//! blabberd --listen 127.0.0.1:8080
//! RUST_LOG=blabd=debug blabberd --config relay.toml
//! ```

fn main() -> anyhow::Result<()> {
    blabd::cli::run()
}
