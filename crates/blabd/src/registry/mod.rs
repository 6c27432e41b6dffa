//! Connection registry using the Actor pattern.
//!
//! The registry is the authoritative set of live connections. A single actor
//! task owns the map; everyone else talks to it through a `RegistryHandle`,
//! so register, unregister and snapshot are serialized without a lock that
//! could ever be held across network I/O.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                      ┌─────────────────┐
//! │ Connection tasks │── register ─────────▶│                 │
//! │  (read loops)    │── unregister ───────▶│  RegistryActor  │──▶ ConnectionEvent
//! └──────────────────┘                      │ BTreeMap<Id,    │    (broadcast)
//! ┌──────────────────┐                      │      Arc<Peer>> │
//! │  Router dispatch │── snapshot ─────────▶│                 │
//! │       loop       │◀─ Vec<Arc<Peer>> ────│                 │
//! └──────────────────┘                      └─────────────────┘
//! ```

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{ConnectionEvent, RegistryCommand, RegistryError, RemovalReason};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor stops once every clone of the returned handle is dropped.
///
/// # Example
///
/// ```no_run
/// use blabd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let registry = spawn_registry();
///     let members = registry.snapshot().await;
///     assert!(members.is_empty());
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone());
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
