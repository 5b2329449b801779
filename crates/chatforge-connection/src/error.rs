/// Errors that can occur on a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Writing to the socket failed; the connection is closed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading from the socket failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The peer violated the frame protocol.
    #[error(transparent)]
    Protocol(#[from] chatforge_protocol::ProtocolError),
}
