//! Send-side handles for connected peers.
//!
//! A `Peer` is shared between the registry (membership) and the router
//! (delivery). The read half of the underlying stream stays with the
//! connection's read loop; only the write half lives here, behind a
//! per-peer async mutex, so one slow peer never blocks another.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Send failures are returned as `ConnectionError`, never panics

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::server::ConnectionError;

/// Default time allowed for a single delivery before the peer is considered dead.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Stable identifier of a connection.
///
/// Assigned by the accept loop from a monotonic counter and never reused
/// for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One opaque message unit, kept in the frame kind it arrived as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl Payload {
    pub fn text(text: impl Into<Utf8Bytes>) -> Self {
        Self::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Extracts the payload of a data frame.
    ///
    /// Control frames (ping, pong, close, raw frames) carry no payload.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(data) => Some(Self::Binary(data)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text),
            Self::Binary(data) => Message::Binary(data),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_str().as_bytes(),
            Self::Binary(data) => &data[..],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outbound half of a peer's stream.
#[async_trait]
pub trait PeerSink: Send {
    /// Writes one payload to the peer.
    async fn deliver(&mut self, payload: Payload) -> Result<(), ConnectionError>;

    /// Closes the outbound half. Errors are swallowed: the peer is gone either way.
    async fn release(&mut self);
}

#[async_trait]
impl<S> PeerSink for SplitSink<WebSocketStream<S>, Message>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn deliver(&mut self, payload: Payload) -> Result<(), ConnectionError> {
        self.send(payload.into_message())
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))
    }

    async fn release(&mut self) {
        let _ = self.send(Message::Close(None)).await;
        let _ = self.close().await;
    }
}

/// In-process sink that forwards payloads into a channel.
///
/// Delivery fails once the receiving side has been dropped, which is how an
/// in-process peer "disconnects".
pub struct ChannelSink {
    sender: Option<mpsc::UnboundedSender<Payload>>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that observes everything delivered to it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Payload>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }
}

#[async_trait]
impl PeerSink for ChannelSink {
    async fn deliver(&mut self, payload: Payload) -> Result<(), ConnectionError> {
        let sender = self.sender.as_ref().ok_or(ConnectionError::Released)?;
        sender
            .send(payload)
            .map_err(|_| ConnectionError::Io("receiver dropped".to_string()))
    }

    async fn release(&mut self) {
        // Dropping the sender ends the receiver's stream.
        self.sender = None;
    }
}

/// Shared handle to a connected peer.
pub type PeerHandle = Arc<Peer>;

/// Send-side state of one connection.
pub struct Peer {
    id: ConnectionId,

    /// Outbound half, locked only for the duration of a single write
    sink: Mutex<Box<dyn PeerSink>>,

    /// Set once the stream has been released
    released: AtomicBool,

    /// Cancelled on release so the read loop can stop
    closed: CancellationToken,

    write_timeout: Duration,
}

impl Peer {
    /// Wraps a sink into a shareable peer handle.
    pub fn new(id: ConnectionId, sink: impl PeerSink + 'static, write_timeout: Duration) -> PeerHandle {
        Arc::new(Self {
            id,
            sink: Mutex::new(Box::new(sink)),
            released: AtomicBool::new(false),
            closed: CancellationToken::new(),
            write_timeout,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sends one payload, bounded by the write timeout.
    pub async fn send(&self, payload: Payload) -> Result<(), ConnectionError> {
        if self.is_released() {
            return Err(ConnectionError::Released);
        }

        let mut sink = self.sink.lock().await;
        match timeout(self.write_timeout, sink.deliver(payload)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }

    /// Releases the underlying stream.
    ///
    /// Only the first call does any work; it returns `true`. Later calls,
    /// including concurrent ones from the other removal path, return `false`.
    pub async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.closed.cancel();
        let mut sink = self.sink.lock().await;
        if timeout(self.write_timeout, sink.release()).await.is_err() {
            debug!(connection = %self.id, "Close handshake timed out");
        }
        debug!(connection = %self.id, "Released peer stream");
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Resolves once the peer has been released by anyone.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
