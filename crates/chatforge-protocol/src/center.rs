//! Envelopes spoken with the coordinator ("center") service.
//!
//! Requests go up as `{"Type": "<kind>", "Parameters": ["<string>", ...]}`
//! inside a tagged frame; the matching response comes back on the same
//! correlation id as `{"Code": <int>, "Message": "<text>", "Data": <any>}`.
//!
//! Unsolicited pushes arrive on correlation id 0 as
//! `{"MessageType": <int>, "Message": "<json>"}` — the inner `Message` is
//! a JSON document *encoded as a string*, decoded a second time into the
//! payload type named by `MessageType`. Double encoding is wasteful but
//! it is the contract the fleet speaks; [`CenterPush::payload`] hides it.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::ProtocolError;
use crate::types::{ChannelType, PlayerId, PlayerInfo, ServerGroupId, UnknownWireValue};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// What a request to the coordinator asks for. Serialized as the bare
/// variant name (`"Login"`, `"Forward"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// Announce this routing node and its public address.
    Login,
    /// Periodic load report: live connection and player counts.
    UpdateClientAndPlayerCount,
    /// Hand a validated chat message to the coordinator for fan-out.
    Forward,
}

/// A request envelope. All parameters travel as strings, structured
/// payloads being JSON-encoded into one parameter slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CenterRequest {
    #[serde(rename = "Type")]
    pub kind: RequestKind,
    #[serde(rename = "Parameters", default)]
    pub parameters: Vec<String>,
}

impl CenterRequest {
    pub fn new(kind: RequestKind, parameters: Vec<String>) -> Self {
        CenterRequest { kind, parameters }
    }
}

/// A response from the coordinator. Code 0 is success; anything else is
/// described by `Message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CenterResponse {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl CenterResponse {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

// ---------------------------------------------------------------------------
// Pushes
// ---------------------------------------------------------------------------

/// Discriminator for the payload inside a [`CenterPush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum PushKind {
    /// A chat message to fan out locally.
    ChatMessage = 1,
    /// An operational broadcast from the game's backoffice.
    PushMessage = 2,
    /// Ban a player: notify, disconnect, forget.
    Forbid = 3,
    /// Mute a player until a deadline.
    Silent = 4,
    /// Re-pull externally managed data (forbidden words).
    Reload = 5,
}

impl From<PushKind> for i32 {
    fn from(k: PushKind) -> i32 {
        k as i32
    }
}

impl TryFrom<i32> for PushKind {
    type Error = UnknownWireValue;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PushKind::ChatMessage),
            2 => Ok(PushKind::PushMessage),
            3 => Ok(PushKind::Forbid),
            4 => Ok(PushKind::Silent),
            5 => Ok(PushKind::Reload),
            _ => Err(UnknownWireValue {
                kind: "push kind",
                value,
            }),
        }
    }
}

/// An unsolicited push from the coordinator (correlation id 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CenterPush {
    pub message_type: PushKind,
    /// JSON document encoded as a string; see [`CenterPush::payload`].
    #[serde(default)]
    pub message: String,
}

impl CenterPush {
    /// Builds a push, JSON-encoding `payload` into the string slot.
    pub fn wrap<T: Serialize>(kind: PushKind, payload: &T) -> Result<Self, ProtocolError> {
        Ok(CenterPush {
            message_type: kind,
            message: serde_json::to_string(payload).map_err(ProtocolError::Encode)?,
        })
    }

    /// Decodes the inner payload as `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_str(&self.message).map_err(ProtocolError::Decode)
    }
}

// ---------------------------------------------------------------------------
// Push payloads
// ---------------------------------------------------------------------------

/// A chat message in flight. Built locally after validation, forwarded
/// to the coordinator as the single parameter of a `Forward` request,
/// and received back (possibly from another node) inside a
/// [`PushKind::ChatMessage`] push. Recipients get it verbatim as the
/// `Data` of their delivery notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChatMessage {
    pub channel_type: ChannelType,
    /// The sender's group at send time; resolution on the receiving
    /// node uses this, not the sender's live state.
    pub server_group_id: ServerGroupId,
    pub message: String,
    pub from: PlayerInfo,
    /// Only set on the private channel.
    #[serde(default)]
    pub to_player_id: PlayerId,
}

/// Sentinel in [`PushMessage::server_group_ids`] meaning "every group".
pub const ALL_GROUPS: &str = "0";

/// An operational broadcast. Exactly one targeting mode applies, checked
/// in order: explicit player ids, then union-within-groups, then groups
/// (where `"0"` means everyone on this node).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushMessage {
    #[serde(default)]
    pub to_player_ids: Vec<PlayerId>,
    #[serde(default)]
    pub to_union_id: String,
    /// Comma-separated group ids, or [`ALL_GROUPS`].
    #[serde(default)]
    pub server_group_ids: String,
    pub message: String,
}

impl PushMessage {
    /// Parses `server_group_ids`, ignoring blanks and junk entries.
    pub fn group_ids(&self) -> Vec<ServerGroupId> {
        self.server_group_ids
            .split(',')
            .filter_map(|part| part.trim().parse::<i32>().ok())
            .map(ServerGroupId)
            .collect()
    }

    pub fn targets_all_groups(&self) -> bool {
        self.server_group_ids.trim() == ALL_GROUPS
    }
}

/// Ban order for one player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForbidMessage {
    pub player_id: PlayerId,
}

/// Mute order for one player. The deadline is Unix seconds; a deadline
/// in the past lifts the mute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SilentMessage {
    pub player_id: PlayerId,
    pub silent_end_time: i64,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_request_wire_shape() {
        let req = CenterRequest::new(
            RequestKind::Login,
            vec!["10.0.0.5:9100".to_owned()],
        );
        let json: serde_json::Value = serde_json::to_value(&req).unwrap();

        assert_eq!(json["Type"], "Login");
        assert_eq!(json["Parameters"][0], "10.0.0.5:9100");
    }

    #[test]
    fn test_request_kind_serializes_as_bare_name() {
        let json = serde_json::to_string(&RequestKind::UpdateClientAndPlayerCount).unwrap();
        assert_eq!(json, "\"UpdateClientAndPlayerCount\"");
    }

    #[test]
    fn test_center_response_success() {
        let resp: CenterResponse =
            serde_json::from_str(r#"{"Code": 0, "Message": "", "Data": null}"#).unwrap();
        assert!(resp.is_success());
    }

    #[test]
    fn test_center_response_missing_optional_fields() {
        let resp: CenterResponse = serde_json::from_str(r#"{"Code": 3}"#).unwrap();
        assert!(!resp.is_success());
        assert!(resp.message.is_empty());
    }

    #[test]
    fn test_center_push_double_encoding_round_trip() {
        let forbid = ForbidMessage {
            player_id: PlayerId::from("p9"),
        };
        let push = CenterPush::wrap(PushKind::Forbid, &forbid).unwrap();

        // The inner message is a string, not a nested object.
        let json: serde_json::Value = serde_json::to_value(&push).unwrap();
        assert_eq!(json["MessageType"], 3);
        assert!(json["Message"].is_string());

        let back: ForbidMessage = push.payload().unwrap();
        assert_eq!(back.player_id.as_str(), "p9");
    }

    #[test]
    fn test_center_push_unknown_message_type_fails() {
        let result: Result<CenterPush, _> =
            serde_json::from_str(r#"{"MessageType": 99, "Message": ""}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_message_round_trip() {
        let msg = ChatMessage {
            channel_type: ChannelType::Private,
            server_group_id: ServerGroupId(4),
            message: "psst".into(),
            from: PlayerInfo {
                id: PlayerId::from("p1"),
                name: "Riva".into(),
                server_group_id: ServerGroupId(4),
                ..PlayerInfo::default()
            },
            to_player_id: PlayerId::from("p2"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channel_type, ChannelType::Private);
        assert_eq!(back.to_player_id.as_str(), "p2");
        assert_eq!(back.from.name, "Riva");
    }

    #[test]
    fn test_push_message_group_ids_parses_comma_list() {
        let push = PushMessage {
            server_group_ids: "1, 2,junk,3".into(),
            ..PushMessage::default()
        };
        assert_eq!(
            push.group_ids(),
            vec![ServerGroupId(1), ServerGroupId(2), ServerGroupId(3)]
        );
        assert!(!push.targets_all_groups());
    }

    #[test]
    fn test_push_message_zero_targets_all_groups() {
        let push = PushMessage {
            server_group_ids: "0".into(),
            ..PushMessage::default()
        };
        assert!(push.targets_all_groups());
    }

    #[test]
    fn test_silent_message_decodes_unix_seconds() {
        let msg: SilentMessage = serde_json::from_str(
            r#"{"PlayerId": "p3", "SilentEndTime": 1756100000}"#,
        )
        .unwrap();
        assert_eq!(msg.silent_end_time, 1756100000);
    }
}
