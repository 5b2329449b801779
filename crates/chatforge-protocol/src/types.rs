//! Core wire types shared by the client and coordinator protocols.
//!
//! Everything here travels on the wire as JSON, and the serde attributes
//! pin the exact shapes the game-client SDK and the coordinator expect:
//! PascalCase field names, enums as plain integers, ids as plain strings.
//! A mismatch here is a protocol break, so the tests at the bottom assert
//! the JSON form of every type, not just round-trips.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The stable identifier a player carries across the whole game platform.
///
/// This is a newtype over the id string the game hands out — we never
/// parse or generate these, only route by them. `#[serde(transparent)]`
/// keeps it a plain JSON string on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty id, used on the wire where "no target" is
    /// spelled as an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        PlayerId(id.to_owned())
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        PlayerId(id)
    }
}

/// A server group: the routing partition a game server belongs to.
///
/// Groups are announced by the topology service; chat only ever compares
/// and indexes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerGroupId(pub i32);

impl fmt::Display for ServerGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Union ids
// ---------------------------------------------------------------------------

/// The value the game sends for "not in a union", alongside the empty
/// string. Both spellings mean the same thing and must be treated alike.
pub const EMPTY_UNION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// True when `union_id` means "no union" (empty or the zero sentinel).
pub fn union_is_empty(union_id: &str) -> bool {
    union_id.is_empty() || union_id == EMPTY_UNION_ID
}

// ---------------------------------------------------------------------------
// Wire enums
// ---------------------------------------------------------------------------

/// Raised when an integer on the wire doesn't name a known enum value.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("unknown {kind} value {value}")]
pub struct UnknownWireValue {
    pub kind: &'static str,
    pub value: i32,
}

/// Chat channel selector, as sent by clients in `SendMessage`.
///
/// `#[serde(into = "i32", try_from = "i32")]` keeps the wire form a plain
/// integer while the code works with a checked enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ChannelType {
    /// Everyone in the sender's server group.
    World = 0,
    /// Members of the sender's union within the sender's group.
    Union = 1,
    /// Exactly the sender and one target on the same group.
    Private = 2,
    /// Every eligible player on every group this process serves.
    CrossServer = 3,
}

impl From<ChannelType> for i32 {
    fn from(c: ChannelType) -> i32 {
        c as i32
    }
}

impl TryFrom<i32> for ChannelType {
    type Error = UnknownWireValue;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChannelType::World),
            1 => Ok(ChannelType::Union),
            2 => Ok(ChannelType::Private),
            3 => Ok(ChannelType::CrossServer),
            _ => Err(UnknownWireValue {
                kind: "channel type",
                value,
            }),
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelType::World => "world",
            ChannelType::Union => "union",
            ChannelType::Private => "private",
            ChannelType::CrossServer => "cross-server",
        };
        f.write_str(name)
    }
}

/// Client command selector.
///
/// The request envelope carries this as a raw integer so that an unknown
/// value can be answered with [`Status::CommandTypeNotDefined`] instead
/// of a generic decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum CommandType {
    Login = 1,
    Logout = 2,
    UpdatePlayerInfo = 3,
    SendMessage = 4,
}

impl From<CommandType> for i32 {
    fn from(c: CommandType) -> i32 {
        c as i32
    }
}

impl TryFrom<i32> for CommandType {
    type Error = UnknownWireValue;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CommandType::Login),
            2 => Ok(CommandType::Logout),
            3 => Ok(CommandType::UpdatePlayerInfo),
            4 => Ok(CommandType::SendMessage),
            _ => Err(UnknownWireValue {
                kind: "command type",
                value,
            }),
        }
    }
}

/// Status codes returned to clients in the response envelope.
///
/// 0 is success; 1–5 are protocol-level faults; 11–17 are identity
/// faults raised while logging in or updating a player; 21–25 are
/// send-message faults. The numbers are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Status {
    Success = 0,
    DataError = 1,
    SignError = 2,
    ClientDataError = 3,
    NoLogin = 4,
    CommandTypeNotDefined = 5,

    NameError = 11,
    UnionIdError = 12,
    PlayerNotExist = 13,
    ServerGroupNotExist = 14,
    PlayerIsForbidden = 15,
    PlayerIsInSilent = 16,
    LoginOnAnotherDevice = 17,

    NotInUnion = 21,
    NotFoundTarget = 22,
    CantSendMessageToSelf = 23,
    ContainForbiddenWord = 24,
    CantSendCrossServerMessage = 25,
}

impl From<Status> for i32 {
    fn from(s: Status) -> i32 {
        s as i32
    }
}

impl TryFrom<i32> for Status {
    type Error = UnknownWireValue;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        use Status::*;
        let status = match value {
            0 => Success,
            1 => DataError,
            2 => SignError,
            3 => ClientDataError,
            4 => NoLogin,
            5 => CommandTypeNotDefined,
            11 => NameError,
            12 => UnionIdError,
            13 => PlayerNotExist,
            14 => ServerGroupNotExist,
            15 => PlayerIsForbidden,
            16 => PlayerIsInSilent,
            17 => LoginOnAnotherDevice,
            21 => NotInUnion,
            22 => NotFoundTarget,
            23 => CantSendMessageToSelf,
            24 => ContainForbiddenWord,
            25 => CantSendCrossServerMessage,
            _ => {
                return Err(UnknownWireValue {
                    kind: "status",
                    value,
                });
            }
        };
        Ok(status)
    }
}

// ---------------------------------------------------------------------------
// Player snapshot
// ---------------------------------------------------------------------------

/// The slice of a player that rides inside chat notices and login
/// responses. This is presentation data for other clients — routing
/// state (connection id, silence deadline) never leaves the process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub union_id: String,
    /// Opaque payload the game attaches at login (title, avatar, level —
    /// chat never looks inside).
    pub extra_msg: String,
    pub server_name: String,
    pub server_group_id: ServerGroupId,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // Identity types
    // =====================================================================

    #[test]
    fn test_player_id_serializes_as_plain_string() {
        // `#[serde(transparent)]` means PlayerId("p1") → `"p1"`,
        // not `{"0":"p1"}`. The client SDK expects a bare string.
        let json = serde_json::to_string(&PlayerId::from("p1")).unwrap();
        assert_eq!(json, "\"p1\"");
    }

    #[test]
    fn test_server_group_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&ServerGroupId(9)).unwrap();
        assert_eq!(json, "9");
    }

    #[test]
    fn test_server_group_id_display() {
        assert_eq!(ServerGroupId(3).to_string(), "G-3");
    }

    // =====================================================================
    // Union sentinel
    // =====================================================================

    #[test]
    fn test_union_is_empty_for_empty_string() {
        assert!(union_is_empty(""));
    }

    #[test]
    fn test_union_is_empty_for_zero_sentinel() {
        assert!(union_is_empty("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_union_is_empty_false_for_real_union() {
        assert!(!union_is_empty("7aa35d6b-4c1f-4c6f-9b6e-2f60ba94ff01"));
    }

    // =====================================================================
    // Wire enums — numeric form is the contract
    // =====================================================================

    #[test]
    fn test_channel_type_serializes_as_int() {
        assert_eq!(serde_json::to_string(&ChannelType::World).unwrap(), "0");
        assert_eq!(
            serde_json::to_string(&ChannelType::CrossServer).unwrap(),
            "3"
        );
    }

    #[test]
    fn test_channel_type_deserializes_from_int() {
        let c: ChannelType = serde_json::from_str("1").unwrap();
        assert_eq!(c, ChannelType::Union);
    }

    #[test]
    fn test_channel_type_unknown_int_fails() {
        let result: Result<ChannelType, _> = serde_json::from_str("42");
        assert!(result.is_err());
    }

    #[test]
    fn test_command_type_wire_values() {
        assert_eq!(i32::from(CommandType::Login), 1);
        assert_eq!(i32::from(CommandType::Logout), 2);
        assert_eq!(i32::from(CommandType::UpdatePlayerInfo), 3);
        assert_eq!(i32::from(CommandType::SendMessage), 4);
    }

    #[test]
    fn test_status_success_is_zero() {
        assert_eq!(serde_json::to_string(&Status::Success).unwrap(), "0");
    }

    #[test]
    fn test_status_round_trips_every_code() {
        let all = [
            Status::Success,
            Status::DataError,
            Status::SignError,
            Status::ClientDataError,
            Status::NoLogin,
            Status::CommandTypeNotDefined,
            Status::NameError,
            Status::UnionIdError,
            Status::PlayerNotExist,
            Status::ServerGroupNotExist,
            Status::PlayerIsForbidden,
            Status::PlayerIsInSilent,
            Status::LoginOnAnotherDevice,
            Status::NotInUnion,
            Status::NotFoundTarget,
            Status::CantSendMessageToSelf,
            Status::ContainForbiddenWord,
            Status::CantSendCrossServerMessage,
        ];
        for status in all {
            let json = serde_json::to_string(&status).unwrap();
            let back: Status = serde_json::from_str(&json).unwrap();
            assert_eq!(status, back);
        }
    }

    // =====================================================================
    // PlayerInfo
    // =====================================================================

    #[test]
    fn test_player_info_uses_pascal_case_fields() {
        let info = PlayerInfo {
            id: PlayerId::from("p7"),
            name: "Riva".into(),
            union_id: String::new(),
            extra_msg: String::new(),
            server_name: "s1".into(),
            server_group_id: ServerGroupId(2),
        };
        let json: serde_json::Value = serde_json::to_value(&info).unwrap();

        assert_eq!(json["Id"], "p7");
        assert_eq!(json["Name"], "Riva");
        assert_eq!(json["ServerGroupId"], 2);
        assert!(json.get("id").is_none(), "fields must be PascalCase");
    }
}
