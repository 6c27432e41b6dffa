//! Registry actor - owns the live-connection set and processes commands.
//!
//! The RegistryActor is the single owner of membership state. It receives
//! commands via an mpsc channel and publishes events via broadcast. It never
//! touches the network: snapshots hand out `Arc<Peer>` clones and the
//! caller does the I/O after the reply has been sent.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored (the caller went away)

use std::collections::BTreeMap;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::peer::{ConnectionId, PeerHandle};

use super::commands::{ConnectionEvent, RegistryCommand, RemovalReason};

/// The registry actor - owns all membership state.
///
/// Commands are processed strictly one at a time, so every snapshot reflects
/// a whole number of register/unregister operations.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Live peers keyed by their stable id. Ordered so snapshots follow join order.
    peers: BTreeMap<ConnectionId, PeerHandle>,

    /// Event publisher for membership observers
    event_publisher: broadcast::Sender<ConnectionEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            receiver,
            peers: BTreeMap::new(),
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until every handle has been dropped.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(connections = self.peers.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register { peer, respond_to } => {
                let inserted = self.handle_register(peer);
                let _ = respond_to.send(inserted);
            }
            RegistryCommand::Unregister {
                id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_unregister(id, reason);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.peers.values().cloned().collect());
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.peers.len());
            }
            RegistryCommand::Drain { reason, respond_to } => {
                let drained = self.handle_drain(reason);
                let _ = respond_to.send(drained);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(&mut self, peer: PeerHandle) -> bool {
        let id = peer.id();
        let inserted = self.peers.insert(id, peer).is_none();

        if inserted {
            info!(
                connection = %id,
                total_connections = self.peers.len(),
                "Connection registered"
            );
            let _ = self.event_publisher.send(ConnectionEvent::Registered { id });
        } else {
            debug!(connection = %id, "Connection re-registered, entry replaced");
        }

        inserted
    }

    fn handle_unregister(&mut self, id: ConnectionId, reason: RemovalReason) -> Option<PeerHandle> {
        let removed = self.peers.remove(&id);

        match removed {
            Some(_) => {
                info!(
                    connection = %id,
                    reason = ?reason,
                    total_connections = self.peers.len(),
                    "Connection unregistered"
                );
                let _ = self
                    .event_publisher
                    .send(ConnectionEvent::Unregistered { id, reason });
            }
            None => {
                debug!(connection = %id, reason = ?reason, "Unregister for absent connection ignored");
            }
        }

        removed
    }

    fn handle_drain(&mut self, reason: RemovalReason) -> Vec<PeerHandle> {
        let drained = std::mem::take(&mut self.peers);

        for id in drained.keys() {
            let _ = self
                .event_publisher
                .send(ConnectionEvent::Unregistered { id: *id, reason });
        }

        if !drained.is_empty() {
            info!(count = drained.len(), reason = ?reason, "Registry drained");
        }

        drained.into_values().collect()
    }

    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }
}
