//! The in-process view of one online player.

use std::time::SystemTime;

use chatforge_connection::ConnectionId;
use chatforge_protocol::{PlayerId, PlayerInfo, ServerGroupId, union_is_empty};

/// Everything the routing tier knows about a player while they are
/// online. The directory hands out owned snapshots of this struct;
/// mutation happens through directory methods so the group and union
/// indexes stay consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub union_id: String,
    /// Opaque payload attached by the game at login; forwarded to other
    /// clients inside chat notices, never interpreted here.
    pub extra_msg: String,
    /// Which partner's deployment this player came in from.
    pub partner_id: i32,
    /// The game server within that partner's deployment.
    pub server_id: i32,
    /// Routing partition, resolved from (partner_id, server_id) at login.
    pub server_group_id: ServerGroupId,
    pub server_name: String,
    /// Whether the game allows this player on the cross-server channel.
    pub cross_server: bool,
    pub forbidden: bool,
    /// Mute deadline; `None` or a past deadline means the player may talk.
    pub silent_until: Option<SystemTime>,
    /// The connection this player is logged in on.
    pub connection: Option<ConnectionId>,
    pub registered_at: SystemTime,
    pub last_login_at: SystemTime,
}

impl Player {
    /// A fresh record for a player seen for the first time. Routing
    /// fields start unresolved; the login flow fills them in.
    pub fn new(
        id: PlayerId,
        name: String,
        union_id: String,
        extra_msg: String,
        partner_id: i32,
        server_id: i32,
    ) -> Self {
        let now = SystemTime::now();
        Player {
            id,
            name,
            union_id,
            extra_msg,
            partner_id,
            server_id,
            server_group_id: ServerGroupId(0),
            server_name: String::new(),
            cross_server: false,
            forbidden: false,
            silent_until: None,
            connection: None,
            registered_at: now,
            last_login_at: now,
        }
    }

    /// True while a mute deadline lies in the future.
    pub fn is_silenced(&self, now: SystemTime) -> bool {
        self.silent_until.is_some_and(|until| until > now)
    }

    /// True when the player belongs to a union (the empty string and the
    /// zero-guid sentinel both mean "no union").
    pub fn has_union(&self) -> bool {
        !union_is_empty(&self.union_id)
    }

    /// The wire-facing slice of this player, embedded in chat notices
    /// and login responses.
    pub fn to_info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            union_id: self.union_id.clone(),
            extra_msg: self.extra_msg.clone(),
            server_name: self.server_name.clone(),
            server_group_id: self.server_group_id,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn player() -> Player {
        Player::new(
            PlayerId::from("p1"),
            "Riva".into(),
            String::new(),
            String::new(),
            1,
            1,
        )
    }

    #[test]
    fn test_is_silenced_false_without_deadline() {
        assert!(!player().is_silenced(SystemTime::now()));
    }

    #[test]
    fn test_is_silenced_true_before_deadline() {
        let mut p = player();
        let now = SystemTime::now();
        p.silent_until = Some(now + Duration::from_secs(60));
        assert!(p.is_silenced(now));
    }

    #[test]
    fn test_is_silenced_false_after_deadline_passes() {
        let mut p = player();
        let now = SystemTime::now();
        p.silent_until = Some(now - Duration::from_secs(1));
        assert!(!p.is_silenced(now));
    }

    #[test]
    fn test_has_union_rejects_sentinel() {
        let mut p = player();
        assert!(!p.has_union());
        p.union_id = "00000000-0000-0000-0000-000000000000".into();
        assert!(!p.has_union());
        p.union_id = "u-77".into();
        assert!(p.has_union());
    }

    #[test]
    fn test_to_info_carries_presentation_fields_only() {
        let mut p = player();
        p.server_group_id = ServerGroupId(4);
        p.server_name = "obsidian".into();
        let info = p.to_info();
        assert_eq!(info.id, p.id);
        assert_eq!(info.server_group_id, ServerGroupId(4));
        assert_eq!(info.server_name, "obsidian");
    }
}
