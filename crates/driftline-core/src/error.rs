use thiserror::Error;

/// Server-assigned code for "could not parse an event frame".
pub const CODE_CANT_PARSE_EVENT: i32 = 1000;
/// Server-assigned code for "could not parse the connection ack".
pub const CODE_CANT_PARSE_CONNECTION_EVENT: i32 = 1004;
/// Synthetic code for transport-level failures (close, I/O error).
pub const CODE_SOCKET_FAILURE: i32 = 1005;

/// Errors surfaced by the connection core.
///
/// Clone is required: a single failure fans out to every registered
/// listener.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("server error {code} (http {status_code}): {message}")]
    Network {
        code: i32,
        message: String,
        status_code: i32,
    },

    #[error("first frame did not decode as a connection ack")]
    CantParseConnectionEvent,

    #[error("failed to decode event frame: {0}")]
    CantParseEvent(String),

    #[error("socket failure: {0}")]
    Socket(String),

    #[error("invalid connection url: {0}")]
    InvalidUrl(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ChatError {
    /// Protocol error code carried by this error, where one applies.
    pub fn code(&self) -> i32 {
        match self {
            Self::Network { code, .. } => *code,
            Self::CantParseConnectionEvent => CODE_CANT_PARSE_CONNECTION_EVENT,
            Self::CantParseEvent(_) => CODE_CANT_PARSE_EVENT,
            Self::Socket(_) => CODE_SOCKET_FAILURE,
            Self::InvalidUrl(_) | Self::Serialization(_) => 0,
        }
    }
}
