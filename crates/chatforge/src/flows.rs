//! The business rules behind each client command.
//!
//! Every flow takes the shared [`ServerState`], validates, talks to the
//! collaborators it needs, and returns either the `Data` half of a
//! success reply or the [`Status`] to fail with. Framing, envelope
//! decoding and the reply itself stay in the dispatcher.

use std::sync::Arc;
use std::time::SystemTime;

use chatforge_connection::Connection;
use chatforge_directory::{Player, ResolvedServer, Topology};
use chatforge_protocol::{
    ChannelType, ChatMessage, ClientResponse, CommandType, LoginCommand, PlayerId,
    SendMessageCommand, Status, UpdatePlayerInfoCommand, union_is_empty,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::collab::{CollabError, GameVerifier, PlayerStore, WordFilter};
use crate::dispatch;
use crate::server::ServerState;

/// What a flow hands back to the dispatcher: the `Data` of a success
/// reply, or the status code to fail with.
pub(crate) type FlowResult = Result<Option<serde_json::Value>, Status>;

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// The digest a game server signs logins with: lowercase hex of
/// `sha256("{id}-{name}-{app_key}")`.
///
/// Public so that embedding binaries and test harnesses can mint valid
/// signatures without copying the recipe.
pub fn login_sign(id: &PlayerId, name: &str, app_key: &str) -> String {
    let digest = Sha256::digest(format!("{id}-{name}-{app_key}"));
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) async fn login<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    conn: &Arc<Connection>,
    cmd: LoginCommand,
) -> FlowResult
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    if cmd.sign != login_sign(&cmd.id, &cmd.name, &state.config.app_key) {
        debug!(player = %cmd.id, "login signature mismatch");
        return Err(Status::SignError);
    }

    let resolved = state
        .topology
        .resolve(cmd.partner_id, cmd.server_id)
        .ok_or(Status::ServerGroupNotExist)?;

    // Profile lookup order: online directory, then the store, then the
    // game server for a first login.
    let (mut player, is_new) = match state.directory.get(&cmd.id) {
        Some(cached) => {
            kick_stale_session(state, conn, &cached);
            (cached, false)
        }
        None => match state.store.fetch(&cmd.id).await.map_err(collab_fault)? {
            Some(stored) => (stored, false),
            None => (verify_new_player(state, &cmd, &resolved).await?, true),
        },
    };

    if player.forbidden {
        debug!(player = %player.id, "refused login of forbidden player");
        return Err(Status::PlayerIsForbidden);
    }

    let now = SystemTime::now();
    player.last_login_at = now;
    if !is_new {
        state
            .store
            .touch_login(&player.id, now)
            .await
            .map_err(collab_fault)?;
    }

    player.server_group_id = resolved.group_id;
    player.server_name = resolved.server_name;
    player.connection = Some(conn.id());

    // If this connection was logged in as someone else, that session is
    // over now.
    if let Some(previous) = conn.bind_player(player.id.clone()) {
        if previous != player.id {
            if let Some(record) = state.directory.get(&previous) {
                if record.connection == Some(conn.id()) {
                    state.directory.unregister(&previous);
                }
            }
        }
    }

    state.directory.register(player.clone());

    info!(
        player = %player.id,
        conn = %conn.id(),
        group = %player.server_group_id,
        new = is_new,
        "player logged in"
    );
    snapshot(&player)
}

/// First-login path: the game server behind the player's group has to
/// vouch for the identity before a record is created.
async fn verify_new_player<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    cmd: &LoginCommand,
    resolved: &ResolvedServer,
) -> Result<Player, Status>
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    let verified = state
        .verifier
        .fetch_player(&resolved.verify_url, &cmd.id)
        .await
        .map_err(collab_fault)?
        .ok_or(Status::PlayerNotExist)?;

    if verified.name != cmd.name {
        return Err(Status::NameError);
    }
    // The game may know a union the client has not heard about yet, so
    // only a non-empty claim has to match.
    if !union_is_empty(&cmd.union_id) && verified.union_id != cmd.union_id {
        return Err(Status::UnionIdError);
    }

    let mut player = Player::new(
        cmd.id.clone(),
        verified.name,
        verified.union_id,
        cmd.extra_msg.clone(),
        cmd.partner_id,
        cmd.server_id,
    );
    player.cross_server = verified.cross_server;

    state.store.insert(&player).await.map_err(collab_fault)?;
    Ok(player)
}

/// Tells a superseded session it lost the device race, then closes it
/// after a grace so the notice has time to flush. The new session keeps
/// going; the delayed disconnect cannot evict it because the directory
/// record points at the new connection by then.
fn kick_stale_session<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    conn: &Arc<Connection>,
    cached: &Player,
) where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    let Some(old_id) = cached.connection else {
        return;
    };
    if old_id == conn.id() {
        return;
    }
    let Some(old_conn) = state.registry.get(old_id) else {
        return;
    };

    info!(
        player = %cached.id,
        old_conn = %old_id,
        new_conn = %conn.id(),
        "player logged in from another device"
    );
    dispatch::respond(
        &old_conn,
        &ClientResponse::fail(CommandType::Login.into(), Status::LoginOnAnotherDevice),
    );

    let state = Arc::clone(state);
    tokio::spawn(async move {
        tokio::time::sleep(state.config.kick_delay).await;
        state.disconnect(&old_conn);
    });
}

// ---------------------------------------------------------------------------
// Logout
// ---------------------------------------------------------------------------

/// Graceful logout. The dispatcher flushes the success reply and then
/// asks the connection to close.
pub(crate) fn logout<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    conn: &Arc<Connection>,
    sender: &Player,
) -> FlowResult
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    conn.take_player();
    if let Some(record) = state.directory.get(&sender.id) {
        if record.connection == Some(conn.id()) {
            state.directory.unregister(&sender.id);
        }
    }
    info!(player = %sender.id, conn = %conn.id(), "player logged out");
    Ok(None)
}

// ---------------------------------------------------------------------------
// UpdatePlayerInfo
// ---------------------------------------------------------------------------

pub(crate) async fn update_player_info<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    sender: Player,
    cmd: UpdatePlayerInfoCommand,
) -> FlowResult
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    // Name and union are identity, so a change goes back to the game
    // server for the same checks a first login gets.
    let identity_changed = cmd.name != sender.name || cmd.union_id != sender.union_id;
    if identity_changed {
        let resolved = state
            .topology
            .resolve(sender.partner_id, sender.server_id)
            .ok_or(Status::ServerGroupNotExist)?;
        let verified = state
            .verifier
            .fetch_player(&resolved.verify_url, &sender.id)
            .await
            .map_err(collab_fault)?
            .ok_or(Status::PlayerNotExist)?;
        if verified.name != cmd.name {
            return Err(Status::NameError);
        }
        if !union_is_empty(&cmd.union_id) && verified.union_id != cmd.union_id {
            return Err(Status::UnionIdError);
        }
    }

    if identity_changed || cmd.extra_msg != sender.extra_msg {
        let mut updated = sender.clone();
        updated.name = cmd.name.clone();
        updated.union_id = cmd.union_id.clone();
        updated.extra_msg = cmd.extra_msg.clone();
        state
            .store
            .update_info(&updated)
            .await
            .map_err(collab_fault)?;
    }

    // The session can vanish mid-flight (forbid push, idle sweep); the
    // client learns it is no longer logged in.
    let player = state
        .directory
        .update_info(&sender.id, cmd.name, cmd.union_id, cmd.extra_msg)
        .map_err(|_| Status::NoLogin)?;

    debug!(player = %player.id, "player info updated");
    snapshot(&player)
}

// ---------------------------------------------------------------------------
// SendMessage
// ---------------------------------------------------------------------------

pub(crate) async fn send_message<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    sender: Player,
    cmd: SendMessageCommand,
) -> FlowResult
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    if sender.is_silenced(SystemTime::now()) {
        return Err(Status::PlayerIsInSilent);
    }

    match cmd.channel_type {
        // Public channels are screened; union and private chat are not.
        ChannelType::World | ChannelType::CrossServer => {
            if state.words.contains_banned(&cmd.message) {
                return Err(Status::ContainForbiddenWord);
            }
        }
        ChannelType::Union => {
            if !sender.has_union() {
                return Err(Status::NotInUnion);
            }
        }
        ChannelType::Private => {
            if cmd.to_player_id.is_empty() {
                return Err(Status::NotFoundTarget);
            }
            if cmd.to_player_id == sender.id {
                return Err(Status::CantSendMessageToSelf);
            }
        }
    }

    if cmd.channel_type == ChannelType::CrossServer {
        ensure_cross_server(state, &sender).await?;
    }

    let message = ChatMessage {
        channel_type: cmd.channel_type,
        server_group_id: sender.server_group_id,
        message: cmd.message,
        from: sender.to_info(),
        to_player_id: cmd.to_player_id,
    };

    // All delivery, even to a recipient on this same process, goes up to
    // the coordinator and comes back as a push.
    if let Err(err) = state.link.forward(message).await {
        warn!(player = %sender.id, error = %err, "chat forward failed");
        return Err(Status::DataError);
    }

    debug!(player = %sender.id, channel = %cmd.channel_type, "message forwarded");
    Ok(None)
}

/// Cross-server talk needs a live entitlement check against the game
/// server, not the flag cached at login.
async fn ensure_cross_server<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    sender: &Player,
) -> Result<(), Status>
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    let resolved = state
        .topology
        .resolve(sender.partner_id, sender.server_id)
        .ok_or(Status::CantSendCrossServerMessage)?;
    let verified = state
        .verifier
        .fetch_player(&resolved.verify_url, &sender.id)
        .await
        .map_err(collab_fault)?
        .ok_or(Status::CantSendCrossServerMessage)?;
    if !verified.cross_server {
        return Err(Status::CantSendCrossServerMessage);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared bits
// ---------------------------------------------------------------------------

/// The body of a login/update success reply: the player's wire info.
fn snapshot(player: &Player) -> FlowResult {
    match serde_json::to_value(player.to_info()) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(player = %player.id, error = %err, "player snapshot failed to serialize");
            Err(Status::DataError)
        }
    }
}

/// Collaborator failures all look the same to the client; the detail
/// goes to the log.
fn collab_fault(err: CollabError) -> Status {
    warn!(error = %err, "collaborator call failed");
    Status::DataError
}

// =========================================================================
// Tests
// =========================================================================
