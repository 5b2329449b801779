//! Envelope decoding and command routing.
//!
//! One inbound frame is one request envelope; every envelope gets
//! exactly one reply, even when it could not be decoded.

use std::sync::Arc;

use bytes::Bytes;
use chatforge_connection::{Connection, Priority};
use chatforge_directory::{Player, Topology};
use chatforge_protocol::{ClientRequest, ClientResponse, CommandType, Status};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::collab::{GameVerifier, PlayerStore, WordFilter};
use crate::flows::{self, FlowResult};
use crate::server::ServerState;

/// Handles one decoded frame payload: route, reply, and for a graceful
/// logout, start closing once the reply is queued.
pub(crate) async fn handle_payload<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    conn: &Arc<Connection>,
    payload: &[u8],
) where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    let response = route(state, conn, payload).await;
    if response.code != Status::Success {
        debug!(
            conn = %conn.id(),
            command = response.command_type,
            code = ?response.code,
            "command refused"
        );
    }
    respond(conn, &response);

    // The logout reply doubles as the goodbye: it has to be in the queue
    // before the drain is told to flush and close.
    if response.code == Status::Success && response.command_type == i32::from(CommandType::Logout)
    {
        conn.request_close();
    }
}

async fn route<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    conn: &Arc<Connection>,
    payload: &[u8],
) -> ClientResponse
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    let request: ClientRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(err) => {
            debug!(conn = %conn.id(), error = %err, "unreadable request envelope");
            return ClientResponse::fail(0, Status::ClientDataError);
        }
    };

    // An unknown selector still gets echoed back, so the client can tell
    // which of its requests was refused.
    let Ok(command_type) = CommandType::try_from(request.command_type) else {
        return ClientResponse::fail(request.command_type, Status::CommandTypeNotDefined);
    };

    match dispatch_command(state, conn, command_type, request.command).await {
        Ok(data) => ClientResponse::ok(command_type.into(), data),
        Err(code) => ClientResponse::fail(command_type.into(), code),
    }
}

async fn dispatch_command<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    conn: &Arc<Connection>,
    command_type: CommandType,
    body: serde_json::Value,
) -> FlowResult
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    match command_type {
        CommandType::Login => flows::login(state, conn, decode(body)?).await,
        CommandType::Logout => {
            let sender = session_player(state, conn).ok_or(Status::NoLogin)?;
            flows::logout(state, conn, &sender)
        }
        CommandType::UpdatePlayerInfo => {
            let sender = session_player(state, conn).ok_or(Status::NoLogin)?;
            flows::update_player_info(state, sender, decode(body)?).await
        }
        CommandType::SendMessage => {
            let sender = session_player(state, conn).ok_or(Status::NoLogin)?;
            flows::send_message(state, sender, decode(body)?).await
        }
    }
}

/// The directory record of the player this connection is logged in as.
/// `None` both for never-logged-in connections and for sessions the
/// directory has since dropped (forbid, duplicate-device kick).
fn session_player<S, V, W, T>(
    state: &ServerState<S, V, W, T>,
    conn: &Connection,
) -> Option<Player>
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    let id = conn.player()?;
    state.directory.get(&id)
}

/// Decodes a command body; malformed fields are the client's fault.
fn decode<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, Status> {
    serde_json::from_value(body).map_err(|err| {
        debug!(error = %err, "malformed command body");
        Status::ClientDataError
    })
}

/// Serializes a reply and queues it for sending. Everything the node
/// says to a client is business traffic and travels high priority.
pub(crate) fn respond(conn: &Connection, response: &ClientResponse) {
    match serde_json::to_vec(response) {
        Ok(json) => conn.enqueue(Priority::High, Bytes::from(json)),
        Err(err) => {
            error!(conn = %conn.id(), error = %err, "reply failed to serialize");
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chatforge_protocol::{ChannelType, SendMessageCommand};
    use serde_json::json;

    #[test]
    fn test_decode_accepts_wire_shape() {
        let body = json!({"ChannelType": 0, "Message": "hello"});
        let cmd: SendMessageCommand = decode(body).expect("valid body should decode");
        assert_eq!(cmd.channel_type, ChannelType::World);
        assert_eq!(cmd.message, "hello");
        assert!(cmd.to_player_id.is_empty());
    }

    #[test]
    fn test_decode_wrong_field_type_is_client_data_error() {
        let body = json!({"ChannelType": "loud", "Message": "hello"});
        let result: Result<SendMessageCommand, Status> = decode(body);
        assert_eq!(result.unwrap_err(), Status::ClientDataError);
    }

    #[test]
    fn test_decode_null_body_is_client_data_error() {
        let result: Result<SendMessageCommand, Status> = decode(serde_json::Value::Null);
        assert_eq!(result.unwrap_err(), Status::ClientDataError);
    }
}
