//! Fan-out router - the single serialization point for broadcasts.
//!
//! Every connection's read loop publishes into one bounded, ordered queue.
//! One dispatch task drains it and delivers each envelope to a registry
//! snapshot. Because there is exactly one consumer, every peer observes
//! dispatched messages in the same relative order, and no lock is held while
//! a peer's write is in flight.
//!
//! # Queue-full policy
//!
//! The queue is bounded. `RouterHandle::publish` waits for capacity instead
//! of dropping, which only ever stalls the producing connection's own read
//! loop. `RouterHandle::try_publish` surfaces `RouterError::QueueFull` for
//! callers that would rather see the condition.
//!
//! # Echo policy
//!
//! With `echo_to_sender` enabled (the default) the origin connection gets
//! its own message back, like every other member of the snapshot.

mod dispatch;

pub use dispatch::{FanOutReport, Router};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::peer::{ConnectionId, Payload};
use crate::registry::RegistryHandle;

/// Default capacity of the delivery queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One inbound message on its way to the fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Connection the payload was read from
    pub origin: ConnectionId,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(origin: ConnectionId, payload: Payload) -> Self {
        Self { origin, payload }
    }
}

/// Router tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Maximum envelopes waiting for dispatch. Must be at least 1.
    pub queue_capacity: usize,

    /// Whether the origin connection receives its own messages.
    pub echo_to_sender: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            echo_to_sender: true,
        }
    }
}

/// Errors returned to producers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// The dispatch loop is gone; nothing will be delivered any more.
    #[error("router is not running")]
    Closed,

    /// Only from `try_publish`: the queue is at capacity.
    #[error("delivery queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },
}

/// Producer side of the delivery queue. Cheap to clone.
#[derive(Clone)]
pub struct RouterHandle {
    sender: mpsc::Sender<Envelope>,
}

impl RouterHandle {
    pub fn new(sender: mpsc::Sender<Envelope>) -> Self {
        Self { sender }
    }

    /// Enqueues an envelope, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// - `RouterError::Closed` if the dispatch loop has stopped
    pub async fn publish(&self, envelope: Envelope) -> Result<(), RouterError> {
        self.sender
            .send(envelope)
            .await
            .map_err(|_| RouterError::Closed)
    }

    /// Enqueues an envelope without waiting.
    ///
    /// # Errors
    ///
    /// - `RouterError::QueueFull` if the queue is at capacity
    /// - `RouterError::Closed` if the dispatch loop has stopped
    pub fn try_publish(&self, envelope: Envelope) -> Result<(), RouterError> {
        self.sender.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RouterError::QueueFull {
                capacity: self.sender.max_capacity(),
            },
            mpsc::error::TrySendError::Closed(_) => RouterError::Closed,
        })
    }

    /// Free slots in the delivery queue right now.
    pub fn available_capacity(&self) -> usize {
        self.sender.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Spawn the dispatch loop and return the producer handle.
///
/// The loop runs until `cancel_token` fires or every `RouterHandle` clone
/// has been dropped and the queue is empty. A zero `queue_capacity` is
/// raised to 1.
pub fn spawn_router(
    registry: RegistryHandle,
    config: RouterConfig,
    cancel_token: CancellationToken,
) -> (RouterHandle, JoinHandle<()>) {
    let (router, handle) = Router::new(registry, config, cancel_token);
    let task = tokio::spawn(router.run());
    (handle, task)
}
