//! The chat routing node: client handling, command dispatch, and
//! coordinator push fan-out.
//!
//! A node accepts game clients over TCP (length-prefixed JSON frames),
//! authenticates logins against the game backend, and tracks the online
//! population in a player directory. Chat never fans out locally on
//! send: every validated message goes up the coordinator link and comes
//! back as a push, so one node's world chat reaches players on every
//! node of the fleet.
//!
//! The embedding binary provides four collaborators: a [`PlayerStore`]
//! for profile persistence, a [`GameVerifier`] for identity checks
//! against game servers, a [`WordFilter`] for message screening, and a
//! [`Topology`] mapping game servers to their groups. Wire shapes live
//! in [`chatforge_protocol`], per-socket queues in
//! [`chatforge_connection`], presence and channel rules in
//! [`chatforge_directory`], and the coordinator link in
//! [`chatforge_uplink`].
//!
//! ```rust,ignore
//! let server = ChatServer::builder()
//!     .bind("0.0.0.0:9000")
//!     .config(config)
//!     .uplink(uplink)
//!     .build(store, verifier, words, topology)
//!     .await?;
//! server.run().await;
//! ```

mod collab;
mod config;
mod dispatch;
mod error;
mod flows;
mod push;
mod server;

pub use collab::{CollabError, GameVerifier, PlayerStore, VerifiedPlayer, WordFilter};
pub use config::ServerConfig;
pub use error::ChatforgeError;
pub use flows::login_sign;
pub use server::{ChatServer, ChatServerBuilder};

// What an embedding binary needs from the layer crates, re-exported so
// common setups depend on this crate alone.
pub use chatforge_directory::{Player, ResolvedServer, Topology};
pub use chatforge_protocol::{PlayerId, ServerGroupId, Status};
pub use chatforge_uplink::{LinkState, UplinkConfig};
