use thiserror::Error;

/// The error taxonomy used across the core: one variant per kind in the
/// error handling design, each carrying the detail its caller needs to
/// react correctly instead of just a message string.
#[derive(Debug, Error)]
pub enum AnonchatError {
    #[error("malformed frame: {0}")]
    ParseError(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("decrypt failed")]
    DecryptError,

    #[error("transport error: {0}")]
    TransportError(#[from] std::io::Error),

    #[error("room policy violation: {0}")]
    RoomPolicyError(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, AnonchatError>;
