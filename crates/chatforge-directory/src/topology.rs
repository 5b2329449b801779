//! The server-group topology capability.
//!
//! Which game server belongs to which routing group is owned by an
//! external management service. The routing tier only ever asks two
//! questions — "which group is (partner, server) in?" and "which groups
//! exist?" — so that is the whole trait.
//!
//! Lookups sit on the private-message hot path, so implementations are
//! expected to answer from an in-memory view and refresh it out of band
//! (the server re-runs roster creation whenever the implementation
//! signals a change).

use chatforge_protocol::ServerGroupId;

/// One resolved game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedServer {
    pub group_id: ServerGroupId,
    /// Display name of the game server, shown alongside chat senders.
    pub server_name: String,
    /// Base URL of the group's game API, used for player verification.
    pub verify_url: String,
}

/// Read access to the server-group topology.
///
/// # Example
///
/// A fixed two-server topology, useful in tests and single-group
/// deployments:
///
/// ```
/// use chatforge_directory::{ResolvedServer, Topology};
/// use chatforge_protocol::ServerGroupId;
///
/// struct FixedTopology;
///
/// impl Topology for FixedTopology {
///     fn resolve(&self, partner_id: i32, server_id: i32) -> Option<ResolvedServer> {
///         (partner_id == 1 && server_id <= 2).then(|| ResolvedServer {
///             group_id: ServerGroupId(1),
///             server_name: format!("server-{server_id}"),
///             verify_url: "http://game.internal/api".into(),
///         })
///     }
///
///     fn group_ids(&self) -> Vec<ServerGroupId> {
///         vec![ServerGroupId(1)]
///     }
/// }
///
/// assert!(FixedTopology.resolve(1, 2).is_some());
/// assert!(FixedTopology.resolve(9, 9).is_none());
/// ```
pub trait Topology: Send + Sync + 'static {
    /// Resolves a (partner, server) pair to its group, or `None` when
    /// the pair is not part of the fleet.
    fn resolve(&self, partner_id: i32, server_id: i32) -> Option<ResolvedServer>;

    /// Every group currently known. Drives roster creation.
    fn group_ids(&self) -> Vec<ServerGroupId>;
}
