//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to connection events.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed` or empty results

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::peer::{ConnectionId, PeerHandle};

use super::commands::{ConnectionEvent, RegistryCommand, RegistryError, RemovalReason};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to membership changes
    event_sender: broadcast::Sender<ConnectionEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Register a connection.
    ///
    /// Returns `true` if the connection was newly inserted, `false` if an
    /// entry with the same id was replaced.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, peer: PeerHandle) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                peer,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Remove a connection.
    ///
    /// Safe to call for an id that is not (or no longer) registered; returns
    /// `None` in that case and when the actor is gone.
    pub async fn unregister(&self, id: ConnectionId, reason: RemovalReason) -> Option<PeerHandle> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Unregister {
                id,
                reason,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Current membership, ordered by connection id.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn snapshot(&self) -> Vec<PeerHandle> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Number of registered connections (0 if the actor is gone).
    pub async fn len(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or_default()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every connection and hand the removed peers back for release.
    pub async fn drain(&self, reason: RemovalReason) -> Vec<PeerHandle> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Drain {
                reason,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Subscribe to connection events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
