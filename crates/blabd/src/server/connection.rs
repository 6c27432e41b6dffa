//! Connection handler for individual peer connections.
//!
//! Each accepted TCP stream is upgraded to a WebSocket and then driven by its
//! own `ConnectionHandler`, which:
//! - Registers the peer's send half with the registry
//! - Reads frames and publishes every data frame to the router
//! - On the way out, unregisters and releases the stream exactly once
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in removal of that peer only

use std::time::Duration;

use futures::stream::SplitStream;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blab_protocol::WS_PATH;

use crate::peer::{ConnectionId, Payload, Peer, PeerHandle};
use crate::registry::{RegistryError, RegistryHandle, RemovalReason};
use crate::router::{Envelope, RouterHandle};

/// Performs the WebSocket upgrade on a freshly accepted stream.
///
/// Only requests for [`WS_PATH`] are accepted; anything else is answered
/// with `404 Not Found`. Inbound messages and frames larger than
/// `max_message_size` are rejected by the transport once the socket is open.
pub async fn upgrade<S>(
    stream: S,
    max_message_size: usize,
    handshake_timeout: Duration,
) -> Result<WebSocketStream<S>, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);

    match timeout(
        handshake_timeout,
        accept_hdr_async_with_config(stream, check_path, Some(config)),
    )
    .await
    {
        Ok(Ok(ws)) => Ok(ws),
        Ok(Err(e)) => Err(ConnectionError::Handshake(e.to_string())),
        Err(_) => Err(ConnectionError::HandshakeTimeout),
    }
}

/// Upgrade callback: accept the chat endpoint, reject every other path.
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    let path = request.uri().path();
    if path == WS_PATH {
        return Ok(response);
    }

    let mut rejection = ErrorResponse::new(Some(format!("no WebSocket endpoint at {path}")));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

/// Drives one upgraded connection from registration to release.
pub struct ConnectionHandler<S> {
    id: ConnectionId,

    /// Send half, shared with the registry and router
    peer: PeerHandle,

    /// Receive half, owned exclusively by this handler
    stream: SplitStream<WebSocketStream<S>>,

    registry: RegistryHandle,
    router: RouterHandle,

    /// Server-wide shutdown
    cancel_token: CancellationToken,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Splits the socket and wraps its write half into a `Peer`.
    pub fn new(
        id: ConnectionId,
        ws: WebSocketStream<S>,
        registry: RegistryHandle,
        router: RouterHandle,
        write_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id,
            peer: Peer::new(id, sink, write_timeout),
            stream,
            registry,
            router,
            cancel_token,
        }
    }

    /// Returns a clone of the peer handle.
    pub fn peer(&self) -> PeerHandle {
        PeerHandle::clone(&self.peer)
    }

    /// Runs the connection until it closes, returning why it closed.
    pub async fn run(mut self) -> RemovalReason {
        let reason = match self.serve().await {
            Ok(reason) => reason,
            Err(ConnectionError::Registry(e)) => {
                warn!(connection = %self.id, error = %e, "Failed to register connection");
                RemovalReason::Disconnected
            }
            Err(e) => {
                debug!(connection = %self.id, error = %e, "Connection closed with error");
                RemovalReason::Disconnected
            }
        };

        // Either trigger may already have done this; both calls are idempotent.
        self.registry.unregister(self.id, reason).await;
        self.peer.release().await;

        info!(connection = %self.id, reason = ?reason, "Client disconnected");
        reason
    }

    /// Joins the registry, then reads until the connection ends.
    async fn serve(&mut self) -> Result<RemovalReason, ConnectionError> {
        self.registry.register(self.peer()).await?;
        info!(connection = %self.id, "Client connected");
        self.read_loop().await
    }

    /// Reads frames until the peer goes away, is released, or the server stops.
    async fn read_loop(&mut self) -> Result<RemovalReason, ConnectionError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    return Ok(RemovalReason::Shutdown);
                }

                _ = self.peer.closed() => {
                    debug!(connection = %self.id, "Peer released by router");
                    return Ok(RemovalReason::SendFailed);
                }

                next = self.stream.next() => {
                    let message = match next {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(ConnectionError::Io(e.to_string())),
                        None => return Ok(RemovalReason::Disconnected),
                    };

                    if let Message::Close(frame) = &message {
                        debug!(connection = %self.id, frame = ?frame, "Client sent close");
                        return Ok(RemovalReason::Disconnected);
                    }

                    // Ping/pong are answered by the transport
                    let Some(payload) = Payload::from_message(message) else {
                        continue;
                    };

                    debug!(connection = %self.id, bytes = payload.len(), "Received message");

                    self.router
                        .publish(Envelope::new(self.id, payload))
                        .await
                        .map_err(|_| ConnectionError::RouterClosed)?;
                }
            }
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Connection already released")]
    Released,

    #[error("Router is not running")]
    RouterClosed,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
