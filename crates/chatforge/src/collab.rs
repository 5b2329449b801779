//! Integration seams between the chat node and the game backend.
//!
//! The node does not talk to a database, a game server's HTTP API, or a
//! banned-word source itself. Those live behind three traits the
//! embedding binary implements: [`PlayerStore`] for profile persistence,
//! [`GameVerifier`] for identity checks against the game, and
//! [`WordFilter`] for message screening.

use std::future::Future;
use std::time::SystemTime;

use chatforge_directory::Player;
use chatforge_protocol::PlayerId;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CollabError
// ---------------------------------------------------------------------------

/// Failure inside a collaborator implementation.
///
/// Command flows map any collaborator failure to a generic data error on
/// the wire; the detail stays in the node's logs.
#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct CollabError {
    context: &'static str,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl CollabError {
    /// Wraps an implementation error with a short description of the
    /// operation that failed.
    pub fn new(
        context: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            context,
            source: source.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PlayerStore
// ---------------------------------------------------------------------------

/// Persistent home of player profiles.
///
/// The directory holds the online population; this trait is where
/// profiles live between sessions. Only the identity fields of
/// [`Player`] are the store's business — runtime fields (connection,
/// group, silence) are rebuilt by the login flow and may come back
/// zeroed from [`fetch`](PlayerStore::fetch).
pub trait PlayerStore: Send + Sync + 'static {
    /// Loads a persisted profile, or `None` for a first login.
    fn fetch(
        &self,
        id: &PlayerId,
    ) -> impl Future<Output = Result<Option<Player>, CollabError>> + Send;

    /// Persists the profile of a player seen for the first time.
    fn insert(&self, player: &Player) -> impl Future<Output = Result<(), CollabError>> + Send;

    /// Persists profile fields changed by an update command.
    fn update_info(&self, player: &Player)
    -> impl Future<Output = Result<(), CollabError>> + Send;

    /// Records a successful login of a returning player.
    fn touch_login(
        &self,
        id: &PlayerId,
        at: SystemTime,
    ) -> impl Future<Output = Result<(), CollabError>> + Send;
}

// ---------------------------------------------------------------------------
// GameVerifier
// ---------------------------------------------------------------------------

/// Identity facts fetched from a game server's verify endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPlayer {
    /// Display name as the game server knows it.
    pub name: String,
    /// Union the game server places the player in. Empty means none.
    pub union_id: String,
    /// Whether the player may take part in cross-server chat.
    pub cross_server: bool,
}

/// Asks a game server whether a player is who they claim to be.
///
/// Used when a player logs in for the first time, when they change
/// their name or union, and to gate cross-server sends. The URL to ask
/// comes from the topology entry of the player's server.
///
/// # Example
///
/// A verifier for tests that knows a single player:
///
/// ```
/// use chatforge::{CollabError, GameVerifier, VerifiedPlayer};
/// use chatforge_protocol::PlayerId;
///
/// struct OnePlayerVerifier;
///
/// impl GameVerifier for OnePlayerVerifier {
///     async fn fetch_player(
///         &self,
///         _verify_url: &str,
///         id: &PlayerId,
///     ) -> Result<Option<VerifiedPlayer>, CollabError> {
///         Ok((id.as_str() == "p1").then(|| VerifiedPlayer {
///             name: "Ash".to_owned(),
///             union_id: String::new(),
///             cross_server: false,
///         }))
///     }
/// }
/// ```
pub trait GameVerifier: Send + Sync + 'static {
    /// Fetches a player's identity from the game server behind
    /// `verify_url`. `Ok(None)` means the game does not know the player.
    fn fetch_player(
        &self,
        verify_url: &str,
        id: &PlayerId,
    ) -> impl Future<Output = Result<Option<VerifiedPlayer>, CollabError>> + Send;
}

// ---------------------------------------------------------------------------
// WordFilter
// ---------------------------------------------------------------------------

/// Screens public messages for banned words.
pub trait WordFilter: Send + Sync + 'static {
    /// Whether `text` contains a banned word. Sits on the path of every
    /// world and cross-server message, so implementations should answer
    /// from memory.
    fn contains_banned(&self, text: &str) -> bool;

    /// Re-reads the banned word list from its source. Triggered by a
    /// coordinator push when the list changes upstream.
    fn reload(&self) -> impl Future<Output = Result<(), CollabError>> + Send;
}
