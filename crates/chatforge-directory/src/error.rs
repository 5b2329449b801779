use chatforge_protocol::PlayerId;

/// Errors raised by directory mutations.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The player is not online on this process.
    #[error("player {0} is not online")]
    PlayerNotFound(PlayerId),
}
