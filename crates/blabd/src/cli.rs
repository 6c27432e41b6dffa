//! Command line entry point of the relay.
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: shutdown (stop accepting, release every connection)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::server::RelayServer;

/// blabd - ephemeral WebSocket chat relay
#[derive(Parser, Debug)]
#[command(name = "blabd", version, about)]
pub struct Args {
    /// TOML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on (overrides config and BLABD_LISTEN)
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Capacity of the delivery queue
    #[arg(long, value_name = "N")]
    pub queue_capacity: Option<usize>,

    /// Don't send a message back to the connection that sent it
    #[arg(long)]
    pub no_echo: bool,
}

impl Args {
    /// Resolves the final config: file and environment first, then flags.
    pub fn resolve(&self) -> Result<ServerConfig> {
        let mut config =
            ServerConfig::load(self.config.as_deref()).context("Failed to load configuration")?;
        self.apply(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut ServerConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if self.no_echo {
            config.echo_to_sender = false;
        }
    }
}

/// Parses arguments and runs the relay until a shutdown signal.
pub fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.resolve()?;
    run_relay(config)
}

#[tokio::main]
async fn run_relay(config: ServerConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("blabd=info".parse()?)
                .add_directive("blab_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "blabd starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let server = RelayServer::start(config, cancel_token)
        .await
        .context("Failed to start relay")?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("blabd stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "blabd",
            "--listen",
            "127.0.0.1:9100",
            "--queue-capacity",
            "4",
            "--no-echo",
        ]);

        let mut config = ServerConfig::default();
        args.apply(&mut config);

        assert_eq!(config.listen, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.queue_capacity, 4);
        assert!(!config.echo_to_sender);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let args = Args::parse_from(["blabd"]);

        let mut config = ServerConfig::default();
        args.apply(&mut config);

        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_invalid_listen_rejected() {
        let result = Args::try_parse_from(["blabd", "--listen", "not-an-address"]);
        assert!(result.is_err());
    }
}
