//! The live-connection registry.
//!
//! One [`ConnectionRegistry`] per process tracks every accepted
//! connection from registration (right after accept) to unregistration
//! (teardown). It is read on every routed message and written only on
//! connect/disconnect, so a reader-writer lock fits the access pattern.
//!
//! The lock is held for map operations only. Anything that touches the
//! network — including disconnecting idle peers — works on a snapshot
//! taken under the read lock and acts after releasing it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::{Connection, ConnectionId};

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a freshly accepted connection.
    pub fn register(&self, conn: Arc<Connection>) {
        let id = conn.id();
        let replaced = self.connections.write().unwrap().insert(id, conn);
        if replaced.is_some() {
            // Ids are monotonic, so this means a teardown bug somewhere.
            tracing::warn!(%id, "registered a connection id that was already present");
        }
    }

    /// Removes and returns a connection; `None` if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().unwrap().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().unwrap().get(&id).cloned()
    }

    /// Number of live connections; reported upstream by the heartbeat.
    pub fn len(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live connection, for shutdown and sweeps.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().unwrap().values().cloned().collect()
    }

    /// Snapshot of every connection idle longer than `timeout`.
    ///
    /// Purely a read: the sweep disconnects and unregisters each entry
    /// afterwards, outside the lock.
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .unwrap()
            .values()
            .filter(|conn| conn.has_expired(now, timeout))
            .cloned()
            .collect()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Arc<Connection> {
        Arc::new(Connection::new("127.0.0.1:0".parse().unwrap()))
    }

    #[test]
    fn test_register_then_get_returns_same_connection() {
        let registry = ConnectionRegistry::new();
        let c = conn();
        let id = c.id();
        registry.register(c.clone());

        let found = registry.get(id).unwrap();
        assert_eq!(found.id(), id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_id_returns_none() {
        let registry = ConnectionRegistry::new();
        let never_registered = conn();
        assert!(registry.get(never_registered.id()).is_none());
    }

    #[test]
    fn test_unregister_removes_and_returns() {
        let registry = ConnectionRegistry::new();
        let c = conn();
        let id = c.id();
        registry.register(c);

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_all_snapshots_every_connection() {
        let registry = ConnectionRegistry::new();
        let a = conn();
        let b = conn();
        registry.register(a.clone());
        registry.register(b.clone());

        let mut ids: Vec<_> = registry.all().iter().map(|c| c.id()).collect();
        ids.sort_by_key(|id| id.into_inner());
        let mut expected = vec![a.id(), b.id()];
        expected.sort_by_key(|id| id.into_inner());
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_expired_returns_only_idle_connections() {
        let registry = ConnectionRegistry::new();
        let idle = conn();
        let fresh = conn();
        idle.rewind_activity(Duration::from_secs(301));
        registry.register(idle.clone());
        registry.register(fresh.clone());

        let expired = registry.expired(Instant::now(), Duration::from_secs(300));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id(), idle.id());
    }

    #[test]
    fn test_expired_is_a_snapshot_not_a_removal() {
        let registry = ConnectionRegistry::new();
        let c = conn();
        c.rewind_activity(Duration::from_secs(301));
        registry.register(c);

        let _ = registry.expired(Instant::now(), Duration::from_secs(300));
        assert_eq!(registry.len(), 1, "expired() must not unregister");
    }
}
