//! The dispatch loop: one consumer draining the delivery queue.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A failed send removes that peer and the pass continues

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::peer::ConnectionId;
use crate::registry::{RegistryHandle, RemovalReason};

use super::{Envelope, RouterConfig, RouterHandle};

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Peers that accepted the payload, in delivery order
    pub delivered: Vec<ConnectionId>,

    /// Peers whose send failed and which were removed
    pub failed: Vec<ConnectionId>,
}

/// Consumer side of the delivery queue.
pub struct Router {
    receiver: mpsc::Receiver<Envelope>,
    registry: RegistryHandle,
    echo_to_sender: bool,
    cancel_token: CancellationToken,

    /// Envelopes dispatched so far
    dispatched: u64,
}

impl Router {
    /// Creates the router and the matching producer handle.
    pub fn new(
        registry: RegistryHandle,
        config: RouterConfig,
        cancel_token: CancellationToken,
    ) -> (Self, RouterHandle) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));

        let router = Self {
            receiver,
            registry,
            echo_to_sender: config.echo_to_sender,
            cancel_token,
            dispatched: 0,
        };

        (router, RouterHandle::new(sender))
    }

    /// Runs the dispatch loop until cancelled or every producer is gone.
    pub async fn run(mut self) {
        info!(echo_to_sender = self.echo_to_sender, "Router starting");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Router shutting down");
                    break;
                }

                next = self.receiver.recv() => {
                    match next {
                        Some(envelope) => {
                            self.dispatch(envelope).await;
                        }
                        None => {
                            debug!("Delivery queue closed");
                            break;
                        }
                    }
                }
            }
        }

        info!(dispatched = self.dispatched, "Router stopped");
    }

    /// Fans one envelope out to the current registry snapshot.
    ///
    /// Every member is attempted exactly once. A member whose send fails is
    /// unregistered and released on the spot; the remaining sends still run.
    pub async fn dispatch(&mut self, envelope: Envelope) -> FanOutReport {
        self.dispatched += 1;

        let Envelope { origin, payload } = envelope;
        let peers = self.registry.snapshot().await;
        let mut report = FanOutReport::default();

        for peer in peers {
            let id = peer.id();
            if !self.echo_to_sender && id == origin {
                continue;
            }

            match peer.send(payload.clone()).await {
                Ok(()) => report.delivered.push(id),
                Err(e) => {
                    warn!(connection = %id, error = %e, "Failed to deliver message, dropping peer");
                    self.registry.unregister(id, RemovalReason::SendFailed).await;
                    peer.release().await;
                    report.failed.push(id);
                }
            }
        }

        debug!(
            origin = %origin,
            bytes = payload.len(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Message dispatched"
        );

        report
    }

    /// Number of envelopes dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{ChannelSink, Payload, Peer, PeerHandle, DEFAULT_WRITE_TIMEOUT};
    use crate::registry::spawn_registry;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct TestPeer {
        handle: PeerHandle,
        inbox: UnboundedReceiver<Payload>,
    }

    async fn join(registry: &RegistryHandle, id: u64) -> TestPeer {
        let (sink, inbox) = ChannelSink::new();
        let handle = Peer::new(ConnectionId::new(id), sink, DEFAULT_WRITE_TIMEOUT);
        registry.register(handle.clone()).await.unwrap();
        TestPeer { handle, inbox }
    }

    fn create_router(registry: &RegistryHandle, echo_to_sender: bool) -> Router {
        let config = RouterConfig {
            queue_capacity: 16,
            echo_to_sender,
        };
        Router::new(registry.clone(), config, CancellationToken::new()).0
    }

    fn text(s: &str) -> Payload {
        Payload::text(s.to_string())
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member_once() {
        let registry = spawn_registry();
        let mut peers = Vec::new();
        for id in 1..=4 {
            peers.push(join(&registry, id).await);
        }
        let mut router = create_router(&registry, true);

        let report = router
            .dispatch(Envelope::new(ConnectionId::new(1), text("hello")))
            .await;

        assert_eq!(report.delivered.len(), 4);
        assert!(report.failed.is_empty());
        for peer in &mut peers {
            assert_eq!(peer.inbox.try_recv().unwrap(), text("hello"));
            assert!(peer.inbox.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_failed_send_isolated_and_removed() {
        let registry = spawn_registry();
        let mut a = join(&registry, 1).await;
        let b = join(&registry, 2).await;
        let mut c = join(&registry, 3).await;
        let mut router = create_router(&registry, true);

        // B's stream breaks
        drop(b.inbox);

        let report = router
            .dispatch(Envelope::new(ConnectionId::new(3), text("ping")))
            .await;

        assert_eq!(report.failed, vec![ConnectionId::new(2)]);
        assert_eq!(report.delivered, vec![ConnectionId::new(1), ConnectionId::new(3)]);
        assert_eq!(a.inbox.try_recv().unwrap(), text("ping"));
        assert_eq!(c.inbox.try_recv().unwrap(), text("ping"));
        assert!(b.handle.is_released());
        assert_eq!(registry.len().await, 2);

        // Next message goes to the reduced set
        let report = router
            .dispatch(Envelope::new(ConnectionId::new(1), text("again")))
            .await;
        assert_eq!(report.delivered, vec![ConnectionId::new(1), ConnectionId::new(3)]);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_echo_disabled_skips_origin() {
        let registry = spawn_registry();
        let mut a = join(&registry, 1).await;
        let mut b = join(&registry, 2).await;
        let mut router = create_router(&registry, false);

        let report = router
            .dispatch(Envelope::new(ConnectionId::new(1), text("hi")))
            .await;

        assert_eq!(report.delivered, vec![ConnectionId::new(2)]);
        assert!(a.inbox.try_recv().is_err());
        assert_eq!(b.inbox.try_recv().unwrap(), text("hi"));
    }

    #[tokio::test]
    async fn test_dispatch_with_empty_registry() {
        let registry = spawn_registry();
        let mut router = create_router(&registry, true);

        let report = router
            .dispatch(Envelope::new(ConnectionId::new(1), text("anyone?")))
            .await;

        assert_eq!(report, FanOutReport::default());
        assert_eq!(router.dispatched(), 1);
    }

    #[tokio::test]
    async fn test_run_preserves_enqueue_order() {
        let registry = spawn_registry();
        let mut a = join(&registry, 1).await;
        let mut b = join(&registry, 2).await;

        let cancel = CancellationToken::new();
        let (router, handle) = Router::new(registry.clone(), RouterConfig::default(), cancel.clone());

        // Enqueue from two different origins before the loop starts
        for i in 0..10u64 {
            let origin = ConnectionId::new(1 + i % 2);
            handle
                .publish(Envelope::new(origin, text(&format!("m{i}"))))
                .await
                .unwrap();
        }
        let task = tokio::spawn(router.run());

        for peer in [&mut a, &mut b] {
            for i in 0..10 {
                assert_eq!(peer.inbox.recv().await.unwrap(), text(&format!("m{i}")));
            }
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_producers_dropped() {
        let registry = spawn_registry();
        let (router, handle) =
            Router::new(registry, RouterConfig::default(), CancellationToken::new());
        let task = tokio::spawn(router.run());

        drop(handle);
        task.await.unwrap();
    }
}
