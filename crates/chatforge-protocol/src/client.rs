//! Envelopes and command payloads spoken with game clients.
//!
//! Requests arrive as `{"CommandType": <int>, "Command": {...}}` and every
//! reply — command results and server-initiated notices alike — leaves as
//! `{"Code": <int>, "CommandType": <int>, "Data": <object|null>}`.
//!
//! The envelope keeps `CommandType` as a raw integer: an unknown value is
//! answered with [`Status::CommandTypeNotDefined`], which a typed field
//! could not express. The `Command` body stays a [`serde_json::Value`]
//! until the dispatcher knows which payload struct to decode it into;
//! field-level type mismatches surface there as decode errors and map to
//! [`Status::ClientDataError`].

use serde::{Deserialize, Serialize};

use crate::types::{ChannelType, PlayerId, Status};

/// One decoded client request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientRequest {
    pub command_type: i32,
    #[serde(default)]
    pub command: serde_json::Value,
}

/// The reply envelope. Also used for server-initiated notices (incoming
/// chat, forbid, another-device), which reuse the command type they
/// relate to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientResponse {
    pub code: Status,
    pub command_type: i32,
    pub data: Option<serde_json::Value>,
}

impl ClientResponse {
    /// A success reply carrying `data`.
    pub fn ok(command_type: i32, data: Option<serde_json::Value>) -> Self {
        ClientResponse {
            code: Status::Success,
            command_type,
            data: data.filter(|v| !v.is_null()),
        }
    }

    /// A failure reply; failures never carry data.
    pub fn fail(command_type: i32, code: Status) -> Self {
        ClientResponse {
            code,
            command_type,
            data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Command payloads
// ---------------------------------------------------------------------------

/// Body of a `Login` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginCommand {
    pub id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub union_id: String,
    #[serde(default)]
    pub extra_msg: String,
    /// Hex digest proving the game server vouches for this login.
    pub sign: String,
    pub partner_id: i32,
    pub server_id: i32,
}

/// Body of an `UpdatePlayerInfo` command. Unchanged fields are sent
/// with their current values, not omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdatePlayerInfoCommand {
    pub name: String,
    #[serde(default)]
    pub union_id: String,
    #[serde(default)]
    pub extra_msg: String,
}

/// Body of a `SendMessage` command. `ToPlayerId` is only meaningful on
/// the private channel, where the empty string means "no target given".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendMessageCommand {
    pub channel_type: ChannelType,
    pub message: String,
    #[serde(default)]
    pub to_player_id: PlayerId,
}

// =========================================================================
// Tests
// =========================================================================
