use std::io;
use std::time::Duration;

use chatforge_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the coordinator link.
#[derive(Debug, Error)]
pub enum UplinkError {
    /// TCP connect to the coordinator failed outright.
    #[error("failed to dial coordinator at {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TCP connect did not complete within the configured window.
    #[error("dial to coordinator at {addr} timed out")]
    DialTimeout { addr: String },

    /// An operation needed a live link and there is none.
    #[error("coordinator link is not connected")]
    NotConnected,

    /// Writing a frame to the coordinator socket failed.
    #[error("failed to send frame to coordinator: {0}")]
    SendFailed(#[source] io::Error),

    /// The coordinator answered the login request with a non-success code.
    #[error("coordinator refused login (code {code}): {message}")]
    LoginRefused { code: i32, message: String },

    /// No login response arrived within the configured window.
    #[error("coordinator login timed out after {0:?}")]
    LoginTimeout(Duration),

    /// The link dropped while a request was waiting for its response.
    #[error("coordinator link lost before a response arrived")]
    LinkLost,

    /// A frame or payload failed to encode or decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
