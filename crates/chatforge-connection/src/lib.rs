//! Client connection handling for chatforge.
//!
//! Provides the per-socket [`Connection`] (receive clock, prioritized
//! send queues, lifecycle state), the [`run_drain`] outbound loop, and
//! the process-wide [`ConnectionRegistry`].
//!
//! This crate owns everything between "socket accepted" and "payload
//! handed to the dispatcher": it knows about frames and queues, but not
//! about players, channels, or commands.

mod connection;
mod error;
mod registry;

pub use connection::{ConnState, Connection, Priority, run_drain};
pub use error::ConnectionError;
pub use registry::ConnectionRegistry;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter behind [`ConnectionId::next`]. Starts at 1 so 0 can keep its
/// historical meaning of "no connection" in logs and dumps.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique identifier for a connection.
///
/// Ids increase monotonically for the life of the process and are never
/// reused, so a stale id can never address a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
