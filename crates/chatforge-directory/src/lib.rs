//! Player presence and recipient resolution for chatforge.
//!
//! This crate answers the routing tier's central questions:
//!
//! - **Who is online?** — [`PlayerDirectory`], the authoritative map of
//!   logged-in players, partitioned into per-group [`GroupRoster`]s.
//! - **Who gets this message?** — [`PlayerDirectory::resolve_recipients`],
//!   the world/union/private/cross-server channel rules.
//! - **Which group is a game server in?** — the [`Topology`] capability,
//!   implemented by the embedding application against its management
//!   service.
//!
//! The directory deals in owned [`Player`] snapshots: lookups clone,
//! mutations go through directory methods, and no lock is ever visible
//! to callers.

mod directory;
mod error;
mod player;
mod topology;

pub use directory::{GroupRoster, PlayerDirectory};
pub use error::DirectoryError;
pub use player::Player;
pub use topology::{ResolvedServer, Topology};
