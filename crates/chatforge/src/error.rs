//! Unified error type for the chatforge meta crate.

use std::io;

use chatforge_connection::ConnectionError;
use chatforge_directory::DirectoryError;
use chatforge_protocol::ProtocolError;
use chatforge_uplink::UplinkError;

/// Top-level error that wraps every layer's error type.
///
/// Embedders of the `chatforge` meta crate deal with this single type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so the `?`
/// operator converts layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ChatforgeError {
    /// A wire-protocol error (framing, encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A client-connection error (send, receive).
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A player-directory error.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// A coordinator-link error (dial, login, request).
    #[error(transparent)]
    Uplink(#[from] UplinkError),

    /// Binding the client listener failed at startup.
    #[error("failed to bind client listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chatforge_protocol::PlayerId;

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::FrameTooLarge { len: 9, max: 4 };
        let top: ChatforgeError = err.into();
        assert!(matches!(top, ChatforgeError::Protocol(_)));
    }

    #[test]
    fn test_from_connection_error() {
        let err = ConnectionError::SendFailed(io::Error::other("broken pipe"));
        let top: ChatforgeError = err.into();
        assert!(matches!(top, ChatforgeError::Connection(_)));
        assert!(top.to_string().contains("broken pipe"));
    }

    #[test]
    fn test_from_directory_error() {
        let err = DirectoryError::PlayerNotFound(PlayerId::from("p1"));
        let top: ChatforgeError = err.into();
        assert!(matches!(top, ChatforgeError::Directory(_)));
    }

    #[test]
    fn test_from_uplink_error() {
        let err = UplinkError::NotConnected;
        let top: ChatforgeError = err.into();
        assert!(matches!(top, ChatforgeError::Uplink(_)));
    }

    #[test]
    fn test_bind_error_names_the_address() {
        let err = ChatforgeError::Bind {
            addr: "0.0.0.0:9000".into(),
            source: io::Error::other("address in use"),
        };
        let text = err.to_string();
        assert!(text.contains("0.0.0.0:9000"));
        assert!(text.contains("address in use"));
    }
}
