use thiserror::Error;

/// Conditions a session does not recover from. Everything else is retried
/// inside the session indefinitely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("station not found: {0}")]
    StationNotFound(String),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("directory lookup failed: {0}")]
    Directory(String),

    #[error("stream url is dead (404)")]
    Dead,

    #[error("could not parse playlist")]
    BadPlaylist,
}
