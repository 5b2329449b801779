//! Persistent link between a chat routing node and its coordinator.
//!
//! The coordinator ("center") is the hub every routing node attaches to:
//! nodes log in with their public address, report load on a heartbeat,
//! and hand validated chat upward for fleet-wide fan-out. In return the
//! coordinator pushes chat and moderation orders down.
//!
//! [`CenterLink`] owns one TCP connection to the coordinator and keeps it
//! alive for the life of the process, reconnecting with backoff when it
//! drops. Requests are matched to responses by correlation id; pushes
//! arrive on id 0 and are dispatched to a [`PushHandler`].

mod error;
mod link;
mod pending;

pub use error::UplinkError;
pub use link::{CenterLink, LinkState, UplinkConfig};

use chatforge_protocol::CenterPush;

/// Live load numbers reported to the coordinator on every heartbeat.
///
/// Implemented by whatever owns the connection registry and the player
/// directory; the link only reads the two counters.
pub trait Census: Send + Sync + 'static {
    /// Open client connections, logged in or not.
    fn connection_count(&self) -> usize;

    /// Players currently registered in the directory.
    fn player_count(&self) -> usize;
}

/// Receives unsolicited coordinator pushes (correlation id 0).
///
/// Each push runs on its own task, so implementations may take their
/// time without stalling the link's read loop.
pub trait PushHandler: Send + Sync + 'static {
    /// Handles one decoded push envelope.
    fn handle(&self, push: CenterPush) -> impl std::future::Future<Output = ()> + Send;
}
