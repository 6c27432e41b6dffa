//! WebSocket accept loop for the relay.
//!
//! The server:
//! - Listens on a TCP address for client connections
//! - Upgrades each connection to a WebSocket on its own task
//! - Spawns a ConnectionHandler (read loop) per upgraded connection
//! - Supports explicit shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept() + upgrade
//!         ▼
//! ┌─────────────────┐ register/unregister ┌─────────────────┐
//! │ConnectionHandler│────────────────────▶│ RegistryHandle  │
//! │  (per client)   │                     └────────▲────────┘
//! └───────┬─────────┘                              │ snapshot
//!         │ publish                                │
//!         ▼                                        │
//! ┌─────────────────┐      dispatch       ┌────────┴────────┐
//! │  RouterHandle   │────────────────────▶│     Router      │──▶ every Peer
//! │ (bounded queue) │                     │ (single task)   │
//! └─────────────────┘                     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept and upgrade errors are logged and allow continued operation

mod connection;

pub use connection::{upgrade, ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::peer::ConnectionId;
use crate::registry::{spawn_registry, RegistryHandle, RemovalReason};
use crate::router::{spawn_router, RouterHandle};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion) doesn't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// WebSocket relay server.
///
/// Owns the listener and hands every accepted connection to its own task.
/// The registry and router are constructed outside and passed in.
pub struct RelayServer {
    listener: TcpListener,

    /// Address actually bound (resolves port 0)
    local_addr: SocketAddr,

    config: ServerConfig,
    registry: RegistryHandle,
    router: RouterHandle,

    /// Cancellation token for shutdown
    cancel_token: CancellationToken,

    /// Counter for assigning connection ids, shared with connection tasks
    connection_counter: Arc<AtomicU64>,
}

impl RelayServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// - `ServerError::Bind` if the address cannot be bound
    pub async fn bind(
        config: ServerConfig,
        registry: RegistryHandle,
        router: RouterHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|e| ServerError::Bind {
                addr: config.listen,
                source: e,
            })?;

        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: config.listen,
            source: e,
        })?;

        Ok(Self {
            listener,
            local_addr,
            config,
            registry,
            router,
            cancel_token,
            connection_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Validates the config, spawns a registry and router, and binds.
    ///
    /// The router stops when `cancel_token` fires; the registry stops once
    /// the server and every connection task are gone.
    pub async fn start(
        config: ServerConfig,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let registry = spawn_registry();
        let (router, _router_task) =
            spawn_router(registry.clone(), config.router_config(), cancel_token.clone());

        Self::bind(config, registry, router, cancel_token).await
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the registry this server registers connections with.
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Returns the producer handle of the router.
    pub fn router(&self) -> &RouterHandle {
        &self.router
    }

    /// Requests shutdown. `run` returns once cleanup is done.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Runs the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Relay server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Upgrades and serves a new connection on its own task.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer_addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let registry = self.registry.clone();
        let router = self.router.clone();
        let cancel_token = self.cancel_token.clone();
        let counter = Arc::clone(&self.connection_counter);
        let max_message_size = self.config.max_message_size;
        let handshake_timeout = self.config.handshake_timeout();
        let write_timeout = self.config.write_timeout();

        tokio::spawn(async move {
            let ws = match upgrade(stream, max_message_size, handshake_timeout).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(peer_addr = %addr, error = %e, "Handshake failed");
                    return;
                }
            };

            // Ids are only handed out once the upgrade succeeded
            let id = ConnectionId::new(counter.fetch_add(1, Ordering::Relaxed) + 1);
            debug!(connection = %id, peer_addr = %addr, "WebSocket upgrade complete");

            let handler =
                ConnectionHandler::new(id, ws, registry, router, write_timeout, cancel_token);
            handler.run().await;
        });
    }

    /// Drains the registry and releases every remaining stream.
    ///
    /// Releases run concurrently, so a stalled peer costs at most one
    /// write timeout in total.
    async fn cleanup(&self) {
        let peers = self.registry.drain(RemovalReason::Shutdown).await;
        let count = peers.len();

        join_all(peers.iter().map(|peer| peer.release())).await;

        info!(released = count, "Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
