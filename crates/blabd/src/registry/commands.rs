//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `ConnectionEvent`: Membership changes published for observers

use thiserror::Error;
use tokio::sync::oneshot;

use crate::peer::{ConnectionId, PeerHandle};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command carries a oneshot channel for the response, so callers
/// get request-response semantics without sharing the map.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Insert a peer. Re-registering an id replaces the entry, never duplicates it.
    Register {
        peer: PeerHandle,
        /// `true` if the id was not present before
        respond_to: oneshot::Sender<bool>,
    },

    /// Remove a peer. No-op if the id is absent.
    Unregister {
        id: ConnectionId,
        reason: RemovalReason,
        /// The removed peer, if it was present
        respond_to: oneshot::Sender<Option<PeerHandle>>,
    },

    /// Copy the current membership, ordered by connection id.
    Snapshot {
        respond_to: oneshot::Sender<Vec<PeerHandle>>,
    },

    /// Number of registered peers.
    Count { respond_to: oneshot::Sender<usize> },

    /// Remove every peer at once.
    Drain {
        reason: RemovalReason,
        respond_to: oneshot::Sender<Vec<PeerHandle>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The actor has shut down and no longer answers commands.
    #[error("registry channel closed")]
    ChannelClosed,
}

// ============================================================================
// Connection Events
// ============================================================================

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The read loop ended (peer closed, read error, protocol violation)
    Disconnected,
    /// A fan-out send to this peer failed or timed out
    SendFailed,
    /// The server is shutting down
    Shutdown,
}

/// Membership changes published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Registered {
        id: ConnectionId,
    },
    Unregistered {
        id: ConnectionId,
        reason: RemovalReason,
    },
}

impl ConnectionEvent {
    /// Connection the event refers to.
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Registered { id } | Self::Unregistered { id, .. } => *id,
        }
    }
}
