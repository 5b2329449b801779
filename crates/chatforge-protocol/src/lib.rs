//! Wire protocol for chatforge.
//!
//! This crate defines the "language" spoken on both network surfaces:
//!
//! - **Framing** ([`frame`]) — length-prefixed frames on raw TCP, plain
//!   on the client side, correlation-tagged on the coordinator link.
//! - **Client envelopes** ([`ClientRequest`], [`ClientResponse`], command
//!   payloads) — the JSON exchanged with game clients.
//! - **Coordinator envelopes** ([`CenterRequest`], [`CenterResponse`],
//!   [`CenterPush`] and its payloads) — the JSON exchanged upstream.
//! - **Shared types** ([`PlayerId`], [`ChannelType`], [`Status`], ...) —
//!   identities and enums whose numeric wire values are contractual.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets, connections, or
//! players' whereabouts — it only converts between bytes and typed
//! messages. Everything above it routes; everything below it reads and
//! writes.
//!
//! ```text
//! TCP bytes → frame codec → JSON envelopes → dispatcher / uplink
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod center;
mod client;
mod error;
pub mod frame;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use center::{
    ALL_GROUPS, CenterPush, CenterRequest, CenterResponse, ChatMessage, ForbidMessage,
    PushKind, PushMessage, RequestKind, SilentMessage,
};
pub use client::{
    ClientRequest, ClientResponse, LoginCommand, SendMessageCommand, UpdatePlayerInfoCommand,
};
pub use error::ProtocolError;
pub use frame::TaggedFrame;
pub use types::{
    ChannelType, CommandType, EMPTY_UNION_ID, PlayerId, PlayerInfo, ServerGroupId, Status,
    UnknownWireValue, union_is_empty,
};
