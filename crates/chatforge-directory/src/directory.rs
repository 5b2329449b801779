//! The online-player directory and channel recipient resolution.
//!
//! One [`PlayerDirectory`] per process answers "who is online, where,
//! and who should receive this message". It keeps two structures:
//!
//! - a global map `player id → Player`, the authoritative record;
//! - one [`GroupRoster`] per server group: the subset of online players
//!   in that group, with a union-id index for union chat.
//!
//! Rosters are created when the topology announces a group and are
//! never destroyed; an empty roster is just an empty set.
//!
//! # Concurrency note
//!
//! The global map and every roster carry their own reader-writer lock.
//! No directory operation holds two locks at once: resolution snapshots
//! member ids under a roster's read lock, releases it, then clones
//! player records under the global read lock. Mutations go through
//! directory methods precisely so this discipline — and the union
//! index — can't be bypassed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use chatforge_protocol::{ChannelType, ChatMessage, PlayerId, ServerGroupId, union_is_empty};

use crate::{DirectoryError, Player, Topology};

// ---------------------------------------------------------------------------
// Group rosters
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RosterInner {
    members: HashSet<PlayerId>,
    /// union id → members of that union in this group. Entries are
    /// dropped when their set empties, so the map only names unions
    /// with at least one online member.
    unions: HashMap<String, HashSet<PlayerId>>,
}

/// The online players of one server group.
pub struct GroupRoster {
    group_id: ServerGroupId,
    inner: RwLock<RosterInner>,
}

impl GroupRoster {
    fn new(group_id: ServerGroupId) -> Self {
        GroupRoster {
            group_id,
            inner: RwLock::new(RosterInner::default()),
        }
    }

    pub fn group_id(&self) -> ServerGroupId {
        self.group_id
    }

    fn insert(&self, player_id: &PlayerId, union_id: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.members.insert(player_id.clone());
        if !union_is_empty(union_id) {
            inner
                .unions
                .entry(union_id.to_owned())
                .or_default()
                .insert(player_id.clone());
        }
    }

    fn remove(&self, player_id: &PlayerId, union_id: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.members.remove(player_id);
        if let Some(set) = inner.unions.get_mut(union_id) {
            set.remove(player_id);
            if set.is_empty() {
                inner.unions.remove(union_id);
            }
        }
    }

    fn relink_union(&self, player_id: &PlayerId, old_union: &str, new_union: &str) {
        let mut inner = self.inner.write().unwrap();
        if let Some(set) = inner.unions.get_mut(old_union) {
            set.remove(player_id);
            if set.is_empty() {
                inner.unions.remove(old_union);
            }
        }
        if !union_is_empty(new_union) && inner.members.contains(player_id) {
            inner
                .unions
                .entry(new_union.to_owned())
                .or_default()
                .insert(player_id.clone());
        }
    }

    fn members(&self) -> Vec<PlayerId> {
        self.inner.read().unwrap().members.iter().cloned().collect()
    }

    fn union_members(&self, union_id: &str) -> Vec<PlayerId> {
        self.inner
            .read()
            .unwrap()
            .unions
            .get(union_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Tracks every player logged in on this process.
#[derive(Default)]
pub struct PlayerDirectory {
    players: RwLock<HashMap<PlayerId, Player>>,
    groups: RwLock<HashMap<ServerGroupId, Arc<GroupRoster>>>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates rosters for any group in `ids` that doesn't have one.
    /// Called at startup and again on every topology change; existing
    /// rosters (and their members) are left untouched.
    pub fn ensure_groups(&self, ids: &[ServerGroupId]) {
        let mut groups = self.groups.write().unwrap();
        for &group_id in ids {
            groups.entry(group_id).or_insert_with(|| {
                tracing::info!(%group_id, "server group roster created");
                Arc::new(GroupRoster::new(group_id))
            });
        }
    }

    fn roster(&self, group_id: ServerGroupId) -> Option<Arc<GroupRoster>> {
        self.groups.read().unwrap().get(&group_id).cloned()
    }

    /// Adds a player, or overwrites their record on re-login. The
    /// global map is authoritative: if the player's group has no roster
    /// (topology hasn't announced it yet), the roster insert is skipped
    /// with an error log and the player is still reachable globally.
    pub fn register(&self, player: Player) {
        let id = player.id.clone();
        let group_id = player.server_group_id;
        let union_id = player.union_id.clone();

        let previous = self.players.write().unwrap().insert(id.clone(), player);

        // A re-login may have moved the player between groups or unions;
        // drop the stale roster entry before adding the fresh one.
        if let Some(prev) = previous {
            if prev.server_group_id != group_id || prev.union_id != union_id {
                if let Some(roster) = self.roster(prev.server_group_id) {
                    roster.remove(&id, &prev.union_id);
                }
            }
        }

        match self.roster(group_id) {
            Some(roster) => roster.insert(&id, &union_id),
            None => {
                tracing::error!(player_id = %id, %group_id, "no roster for player's server group");
            }
        }
        tracing::debug!(player_id = %id, %group_id, "player registered");
    }

    /// Removes a player from the roster and the global map, returning
    /// the removed record.
    pub fn unregister(&self, id: &PlayerId) -> Option<Player> {
        let snapshot = self.players.read().unwrap().get(id).cloned()?;
        if let Some(roster) = self.roster(snapshot.server_group_id) {
            roster.remove(id, &snapshot.union_id);
        }
        let removed = self.players.write().unwrap().remove(id);
        tracing::debug!(player_id = %id, "player unregistered");
        removed
    }

    /// Snapshot of one player, from the in-process cache only.
    pub fn get(&self, id: &PlayerId) -> Option<Player> {
        self.players.read().unwrap().get(id).cloned()
    }

    /// Applies a profile update, re-linking the union index when the
    /// union changed. Returns the fresh snapshot.
    pub fn update_info(
        &self,
        id: &PlayerId,
        name: String,
        union_id: String,
        extra_msg: String,
    ) -> Result<Player, DirectoryError> {
        let (snapshot, old_union) = {
            let mut players = self.players.write().unwrap();
            let player = players
                .get_mut(id)
                .ok_or_else(|| DirectoryError::PlayerNotFound(id.clone()))?;
            let old_union = std::mem::replace(&mut player.union_id, union_id);
            player.name = name;
            player.extra_msg = extra_msg;
            (player.clone(), old_union)
        };

        if old_union != snapshot.union_id {
            if let Some(roster) = self.roster(snapshot.server_group_id) {
                roster.relink_union(id, &old_union, &snapshot.union_id);
            }
        }
        Ok(snapshot)
    }

    /// Sets or lifts a player's mute deadline.
    pub fn set_silence(
        &self,
        id: &PlayerId,
        until: Option<SystemTime>,
    ) -> Result<(), DirectoryError> {
        let mut players = self.players.write().unwrap();
        let player = players
            .get_mut(id)
            .ok_or_else(|| DirectoryError::PlayerNotFound(id.clone()))?;
        player.silent_until = until;
        Ok(())
    }

    /// Number of players online on this process; reported upstream by
    /// the link heartbeat.
    pub fn player_count(&self) -> usize {
        self.players.read().unwrap().len()
    }

    /// Online players in one group; 0 for unknown groups.
    pub fn group_player_count(&self, group_id: ServerGroupId) -> usize {
        self.roster(group_id).map(|r| r.len()).unwrap_or(0)
    }

    // -----------------------------------------------------------------
    // Recipient resolution
    // -----------------------------------------------------------------

    /// Members of one server group.
    pub fn group_members(&self, group_id: ServerGroupId) -> Vec<Player> {
        match self.roster(group_id) {
            Some(roster) => self.collect(&roster.members()),
            None => Vec::new(),
        }
    }

    /// Members of `union_id` within one server group.
    pub fn union_members(&self, group_id: ServerGroupId, union_id: &str) -> Vec<Player> {
        if union_is_empty(union_id) {
            return Vec::new();
        }
        match self.roster(group_id) {
            Some(roster) => self.collect(&roster.union_members(union_id)),
            None => Vec::new(),
        }
    }

    /// Every player online on this process.
    pub fn all_players(&self) -> Vec<Player> {
        self.players.read().unwrap().values().cloned().collect()
    }

    /// The recipient set for a chat message handed down by the
    /// coordinator. World, union, and cross-server resolve against the
    /// group and union captured in the message at send time. Private
    /// messages additionally require the target to be online here and
    /// in the sender's group; otherwise the message is dropped without
    /// an error to anyone.
    pub fn resolve_recipients<T: Topology>(&self, topology: &T, msg: &ChatMessage) -> Vec<Player> {
        match msg.channel_type {
            ChannelType::World => self.group_members(msg.server_group_id),
            ChannelType::Union => self.union_members(msg.server_group_id, &msg.from.union_id),
            ChannelType::CrossServer => self
                .all_players()
                .into_iter()
                .filter(|p| p.cross_server)
                .collect(),
            ChannelType::Private => self.private_pair(
                topology,
                &msg.from.id,
                &msg.to_player_id,
                msg.server_group_id,
            ),
        }
    }

    /// Private delivery: the target must be online here, and the group
    /// resolved for the *target's* game server must match the sender's.
    /// The sender is included when they are on this process, so their
    /// own client can echo the message.
    fn private_pair<T: Topology>(
        &self,
        topology: &T,
        sender_id: &PlayerId,
        target_id: &PlayerId,
        sender_group: ServerGroupId,
    ) -> Vec<Player> {
        let Some(target) = self.get(target_id) else {
            tracing::debug!(%target_id, "private target not online here, dropping");
            return Vec::new();
        };
        let Some(resolved) = topology.resolve(target.partner_id, target.server_id) else {
            tracing::debug!(%target_id, "private target's server unknown to topology, dropping");
            return Vec::new();
        };
        if resolved.group_id != sender_group {
            tracing::debug!(
                %target_id,
                target_group = %resolved.group_id,
                %sender_group,
                "private message across groups, dropping"
            );
            return Vec::new();
        }

        let mut recipients = Vec::with_capacity(2);
        if sender_id != target_id {
            if let Some(sender) = self.get(sender_id) {
                recipients.push(sender);
            }
        }
        recipients.push(target);
        recipients
    }

    fn collect(&self, ids: &[PlayerId]) -> Vec<Player> {
        let players = self.players.read().unwrap();
        ids.iter().filter_map(|id| players.get(id).cloned()).collect()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResolvedServer;
    use chatforge_protocol::{ChatMessage, PlayerInfo};

    /// Maps partner id straight onto the group id; servers 1..=9 exist.
    struct TestTopology;

    impl Topology for TestTopology {
        fn resolve(&self, partner_id: i32, server_id: i32) -> Option<ResolvedServer> {
            (1..=9).contains(&server_id).then(|| ResolvedServer {
                group_id: ServerGroupId(partner_id),
                server_name: format!("srv-{partner_id}-{server_id}"),
                verify_url: String::new(),
            })
        }

        fn group_ids(&self) -> Vec<ServerGroupId> {
            vec![ServerGroupId(1), ServerGroupId(2)]
        }
    }

    fn directory() -> PlayerDirectory {
        let dir = PlayerDirectory::new();
        dir.ensure_groups(&TestTopology.group_ids());
        dir
    }

    fn player(id: &str, group: i32, union: &str) -> Player {
        let mut p = Player::new(
            PlayerId::from(id),
            format!("name-{id}"),
            union.to_owned(),
            String::new(),
            group,
            1,
        );
        p.server_group_id = ServerGroupId(group);
        p
    }

    fn chat(channel: ChannelType, group: i32, from: &Player, to: &str) -> ChatMessage {
        ChatMessage {
            channel_type: channel,
            server_group_id: ServerGroupId(group),
            message: "hi".into(),
            from: from.to_info(),
            to_player_id: PlayerId::from(to),
        }
    }

    fn ids(players: &[Player]) -> HashSet<String> {
        players.iter().map(|p| p.id.0.clone()).collect()
    }

    // =====================================================================
    // Registration consistency
    // =====================================================================

    #[test]
    fn test_register_then_get_returns_snapshot() {
        let dir = directory();
        dir.register(player("p1", 1, ""));
        let found = dir.get(&PlayerId::from("p1")).unwrap();
        assert_eq!(found.name, "name-p1");
        assert_eq!(dir.player_count(), 1);
        assert_eq!(dir.group_player_count(ServerGroupId(1)), 1);
    }

    #[test]
    fn test_register_unknown_group_still_globally_reachable() {
        let dir = directory();
        dir.register(player("p1", 42, ""));

        assert!(dir.get(&PlayerId::from("p1")).is_some());
        assert_eq!(dir.player_count(), 1);
        assert!(dir.group_members(ServerGroupId(42)).is_empty());
    }

    #[test]
    fn test_unregister_clears_global_and_roster() {
        let dir = directory();
        dir.register(player("p1", 1, "u-1"));

        let removed = dir.unregister(&PlayerId::from("p1")).unwrap();
        assert_eq!(removed.id.as_str(), "p1");
        assert!(dir.get(&PlayerId::from("p1")).is_none());
        assert_eq!(dir.group_player_count(ServerGroupId(1)), 0);
        assert!(dir.union_members(ServerGroupId(1), "u-1").is_empty());
    }

    #[test]
    fn test_unregister_unknown_player_is_none() {
        let dir = directory();
        assert!(dir.unregister(&PlayerId::from("ghost")).is_none());
    }

    #[test]
    fn test_register_relogin_moves_roster_membership() {
        let dir = directory();
        dir.register(player("p1", 1, "u-old"));
        // Same player comes back on group 2 with a different union.
        dir.register(player("p1", 2, "u-new"));

        assert_eq!(dir.player_count(), 1);
        assert_eq!(dir.group_player_count(ServerGroupId(1)), 0);
        assert_eq!(dir.group_player_count(ServerGroupId(2)), 1);
        assert!(dir.union_members(ServerGroupId(1), "u-old").is_empty());
        assert_eq!(dir.union_members(ServerGroupId(2), "u-new").len(), 1);
    }

    // =====================================================================
    // Profile mutation
    // =====================================================================

    #[test]
    fn test_update_info_relinks_union_index() {
        let dir = directory();
        dir.register(player("p1", 1, "u-old"));

        let updated = dir
            .update_info(
                &PlayerId::from("p1"),
                "renamed".into(),
                "u-new".into(),
                "lvl 9".into(),
            )
            .unwrap();

        assert_eq!(updated.name, "renamed");
        assert!(dir.union_members(ServerGroupId(1), "u-old").is_empty());
        assert_eq!(ids(&dir.union_members(ServerGroupId(1), "u-new")), ids(&[updated]));
    }

    #[test]
    fn test_update_info_unknown_player_errors() {
        let dir = directory();
        let err = dir
            .update_info(&PlayerId::from("ghost"), "n".into(), "".into(), "".into())
            .unwrap_err();
        assert!(matches!(err, DirectoryError::PlayerNotFound(_)));
    }

    #[test]
    fn test_set_silence_shows_in_snapshot() {
        let dir = directory();
        dir.register(player("p1", 1, ""));
        let until = SystemTime::now() + std::time::Duration::from_secs(600);

        dir.set_silence(&PlayerId::from("p1"), Some(until)).unwrap();
        let p = dir.get(&PlayerId::from("p1")).unwrap();
        assert!(p.is_silenced(SystemTime::now()));
    }

    // =====================================================================
    // Recipient resolution
    // =====================================================================

    #[test]
    fn test_world_resolves_exactly_the_senders_group() {
        let dir = directory();
        dir.register(player("a", 1, ""));
        dir.register(player("b", 1, "u-1"));
        dir.register(player("c", 2, ""));

        let sender = dir.get(&PlayerId::from("a")).unwrap();
        let got = dir.resolve_recipients(&TestTopology, &chat(ChannelType::World, 1, &sender, ""));
        assert_eq!(ids(&got), HashSet::from(["a".into(), "b".into()]));
    }

    #[test]
    fn test_union_resolves_same_group_same_union() {
        let dir = directory();
        dir.register(player("a", 1, "u-1"));
        dir.register(player("b", 1, "u-1"));
        dir.register(player("c", 1, "u-2"));
        dir.register(player("d", 2, "u-1"));

        let sender = dir.get(&PlayerId::from("a")).unwrap();
        let got = dir.resolve_recipients(&TestTopology, &chat(ChannelType::Union, 1, &sender, ""));
        assert_eq!(ids(&got), HashSet::from(["a".into(), "b".into()]));
    }

    #[test]
    fn test_union_with_sentinel_union_resolves_to_nobody() {
        let dir = directory();
        dir.register(player("a", 1, ""));
        dir.register(player("b", 1, ""));

        let sender = dir.get(&PlayerId::from("a")).unwrap();
        let got = dir.resolve_recipients(&TestTopology, &chat(ChannelType::Union, 1, &sender, ""));
        assert!(got.is_empty());
    }

    #[test]
    fn test_private_same_group_delivers_to_both_ends() {
        let dir = directory();
        dir.register(player("a", 1, ""));
        dir.register(player("b", 1, ""));

        let sender = dir.get(&PlayerId::from("a")).unwrap();
        let got =
            dir.resolve_recipients(&TestTopology, &chat(ChannelType::Private, 1, &sender, "b"));
        assert_eq!(ids(&got), HashSet::from(["a".into(), "b".into()]));
    }

    #[test]
    fn test_private_across_groups_drops_silently() {
        let dir = directory();
        dir.register(player("a", 1, ""));
        dir.register(player("b", 2, ""));

        let sender = dir.get(&PlayerId::from("a")).unwrap();
        let got =
            dir.resolve_recipients(&TestTopology, &chat(ChannelType::Private, 1, &sender, "b"));
        assert!(got.is_empty());
    }

    #[test]
    fn test_private_target_offline_drops_silently() {
        let dir = directory();
        dir.register(player("a", 1, ""));

        let sender = dir.get(&PlayerId::from("a")).unwrap();
        let got =
            dir.resolve_recipients(&TestTopology, &chat(ChannelType::Private, 1, &sender, "gone"));
        assert!(got.is_empty());
    }

    #[test]
    fn test_private_remote_sender_still_reaches_local_target() {
        // The sender lives on another routing node; only the target is
        // online here. The target must still get the message.
        let dir = directory();
        dir.register(player("b", 1, ""));

        let remote_sender = ChatMessage {
            channel_type: ChannelType::Private,
            server_group_id: ServerGroupId(1),
            message: "hi".into(),
            from: PlayerInfo {
                id: PlayerId::from("remote"),
                ..PlayerInfo::default()
            },
            to_player_id: PlayerId::from("b"),
        };
        let got = dir.resolve_recipients(&TestTopology, &remote_sender);
        assert_eq!(ids(&got), HashSet::from(["b".into()]));
    }

    #[test]
    fn test_cross_server_resolves_only_eligible_players() {
        let dir = directory();
        let mut a = player("a", 1, "");
        a.cross_server = true;
        let mut c = player("c", 2, "");
        c.cross_server = true;
        dir.register(a);
        dir.register(player("b", 1, ""));
        dir.register(c);

        let sender = dir.get(&PlayerId::from("a")).unwrap();
        let got =
            dir.resolve_recipients(&TestTopology, &chat(ChannelType::CrossServer, 1, &sender, ""));
        assert_eq!(ids(&got), HashSet::from(["a".into(), "c".into()]));
    }

    #[test]
    fn test_ensure_groups_is_idempotent() {
        let dir = directory();
        dir.register(player("a", 1, ""));
        dir.ensure_groups(&[ServerGroupId(1), ServerGroupId(3)]);

        assert_eq!(dir.group_player_count(ServerGroupId(1)), 1);
        assert_eq!(dir.group_player_count(ServerGroupId(3)), 0);
    }
}
