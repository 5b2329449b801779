//! Turns coordinator pushes into local action: chat fan-out, broadcast
//! notices, and moderation orders.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use chatforge_connection::{ConnectionRegistry, Priority};
use chatforge_directory::{Player, PlayerDirectory, Topology};
use chatforge_protocol::{
    CenterPush, ChatMessage, ClientResponse, CommandType, ForbidMessage, PushKind, PushMessage,
    SilentMessage, Status, union_is_empty,
};
use chatforge_uplink::PushHandler;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::collab::WordFilter;
use crate::dispatch;
use crate::server;

// ---------------------------------------------------------------------------
// PushRouter
// ---------------------------------------------------------------------------

/// The [`PushHandler`] given to the uplink. Holds shared views of the
/// registry and directory so pushes act on sessions without going
/// through the command path.
pub(crate) struct PushRouter<W, T> {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<PlayerDirectory>,
    topology: Arc<T>,
    words: Arc<W>,
    kick_delay: Duration,
}

impl<W: WordFilter, T: Topology> PushRouter<W, T> {
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<PlayerDirectory>,
        topology: Arc<T>,
        words: Arc<W>,
        kick_delay: Duration,
    ) -> Self {
        Self {
            registry,
            directory,
            topology,
            words,
            kick_delay,
        }
    }

    /// A chat message routed back by the coordinator, possibly one a
    /// client of this very process sent moments ago.
    fn deliver_chat(&self, push: &CenterPush) {
        let message: ChatMessage = match push.payload() {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "undecodable chat push");
                return;
            }
        };

        let recipients = self
            .directory
            .resolve_recipients(self.topology.as_ref(), &message);
        let data = match serde_json::to_value(&message) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "chat notice failed to serialize");
                return;
            }
        };
        let notice = ClientResponse::ok(CommandType::SendMessage.into(), Some(data));

        let delivered = broadcast(&self.registry, &recipients, &notice);
        debug!(
            channel = %message.channel_type,
            recipients = recipients.len(),
            delivered,
            "chat message delivered"
        );
    }

    /// An operational broadcast from the backoffice.
    fn deliver_notice(&self, push: &CenterPush) {
        let message: PushMessage = match push.payload() {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "undecodable broadcast push");
                return;
            }
        };

        let targets = push_targets(&self.directory, &message);
        let notice = ClientResponse::ok(
            CommandType::SendMessage.into(),
            Some(json!({ "Message": message.message })),
        );

        let delivered = broadcast(&self.registry, &targets, &notice);
        info!(targets = targets.len(), delivered, "broadcast delivered");
    }

    /// Ban order: notify the session if it is live, give the notice a
    /// moment to flush, then disconnect and forget the player.
    async fn apply_forbid(&self, push: &CenterPush) {
        let order: ForbidMessage = match push.payload() {
            Ok(order) => order,
            Err(err) => {
                warn!(error = %err, "undecodable forbid push");
                return;
            }
        };

        let Some(record) = self.directory.get(&order.player_id) else {
            debug!(player = %order.player_id, "forbid for a player not online");
            return;
        };

        let conn = record.connection.and_then(|id| self.registry.get(id));
        let Some(conn) = conn else {
            // No live connection behind the record; just forget it.
            self.directory.unregister(&order.player_id);
            info!(player = %order.player_id, "forbidden player removed from directory");
            return;
        };

        info!(player = %order.player_id, conn = %conn.id(), "forbidding player");
        dispatch::respond(
            &conn,
            &ClientResponse::fail(CommandType::Login.into(), Status::PlayerIsForbidden),
        );
        tokio::time::sleep(self.kick_delay).await;
        server::disconnect_client(&self.registry, &self.directory, &conn);
    }

    /// Mute order. A deadline at or before now (or a negative one)
    /// lifts the mute; the session stays connected either way.
    fn apply_silence(&self, push: &CenterPush) {
        let order: SilentMessage = match push.payload() {
            Ok(order) => order,
            Err(err) => {
                warn!(error = %err, "undecodable silence push");
                return;
            }
        };

        let until = u64::try_from(order.silent_end_time)
            .ok()
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));
        match self.directory.set_silence(&order.player_id, until) {
            Ok(()) => {
                info!(
                    player = %order.player_id,
                    until = order.silent_end_time,
                    "silence deadline updated"
                );
            }
            Err(err) => debug!(error = %err, "silence for a player not online"),
        }
    }

    async fn reload_words(&self) {
        match self.words.reload().await {
            Ok(()) => info!("forbidden word list reloaded"),
            Err(err) => warn!(error = %err, "forbidden word reload failed"),
        }
    }
}

impl<W: WordFilter, T: Topology> PushHandler for PushRouter<W, T> {
    fn handle(&self, push: CenterPush) -> impl Future<Output = ()> + Send {
        async move {
            match push.message_type {
                PushKind::ChatMessage => self.deliver_chat(&push),
                PushKind::PushMessage => self.deliver_notice(&push),
                PushKind::Forbid => self.apply_forbid(&push).await,
                PushKind::Silent => self.apply_silence(&push),
                PushKind::Reload => self.reload_words().await,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery helpers
// ---------------------------------------------------------------------------

/// Serializes `notice` once and queues it on every recipient that still
/// has a live connection. Returns how many got it.
fn broadcast(
    registry: &ConnectionRegistry,
    recipients: &[Player],
    notice: &ClientResponse,
) -> usize {
    let payload = match serde_json::to_vec(notice) {
        Ok(json) => Bytes::from(json),
        Err(err) => {
            warn!(error = %err, "notice failed to serialize");
            return 0;
        }
    };

    let mut delivered = 0;
    for recipient in recipients {
        let Some(conn) = recipient.connection.and_then(|id| registry.get(id)) else {
            continue;
        };
        conn.enqueue(Priority::High, payload.clone());
        delivered += 1;
    }
    delivered
}

/// Resolves a broadcast to the local players it addresses. Exactly one
/// targeting mode applies: explicit ids win, then union within the
/// listed groups, then the group list itself (`"0"` meaning everyone).
pub(crate) fn push_targets(directory: &PlayerDirectory, message: &PushMessage) -> Vec<Player> {
    if !message.to_player_ids.is_empty() {
        return message
            .to_player_ids
            .iter()
            .filter_map(|id| directory.get(id))
            .collect();
    }

    if !union_is_empty(&message.to_union_id) {
        if message.targets_all_groups() {
            return directory
                .all_players()
                .into_iter()
                .filter(|p| p.union_id == message.to_union_id)
                .collect();
        }
        return message
            .group_ids()
            .into_iter()
            .flat_map(|group| directory.union_members(group, &message.to_union_id))
            .collect();
    }

    if message.targets_all_groups() {
        return directory.all_players();
    }

    message
        .group_ids()
        .into_iter()
        .flat_map(|group| directory.group_members(group))
        .collect()
}

// =========================================================================
// Tests
// =========================================================================
