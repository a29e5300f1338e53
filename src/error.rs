use thiserror::Error;

/// Errors surfaced by the channel, the multiplexer and the handlers.
///
/// The enum is `Clone` so that a single receive-loop failure can be handed to
/// every caller that is still waiting on a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    #[error("The connection is not open")]
    NotConnected,

    #[error("The connection is already open")]
    AlreadyOpen,

    #[error("The connection has been closed")]
    ConnectionClosed,

    #[error("A request with the id '{0}' is already registered")]
    DuplicateId(String),

    #[error("Protocol error at byte {offset}: {message}")]
    ProtocolParse { message: String, offset: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Connect timed out after {0}ms")]
    Timeout(u64),

    #[error("The request was cancelled")]
    Cancelled,
}

pub type WsResult<T> = Result<T, WsError>;

impl WsError {
    /// True for errors after which the connection cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WsError::ConnectionClosed | WsError::ProtocolParse { .. } | WsError::Transport(_)
        )
    }
}

impl From<std::io::Error> for WsError {
    fn from(err: std::io::Error) -> Self {
        match err.get_ref().and_then(|inner| inner.downcast_ref::<WsError>()) {
            Some(inner) => inner.clone(),
            None => WsError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for WsError {
    fn from(err: serde_json::Error) -> Self {
        WsError::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => WsError::ConnectionClosed,
            other => WsError::Transport(other.to_string()),
        }
    }
}

impl From<url::ParseError> for WsError {
    fn from(err: url::ParseError) -> Self {
        WsError::InvalidUrl(err.to_string())
    }
}

impl From<WsError> for std::io::Error {
    fn from(err: WsError) -> Self {
        let kind = match err {
            WsError::NotConnected | WsError::ConnectionClosed => std::io::ErrorKind::NotConnected,
            WsError::ProtocolParse { .. } | WsError::Serialization(_) => {
                std::io::ErrorKind::InvalidData
            }
            WsError::Timeout(_) => std::io::ErrorKind::TimedOut,
            WsError::Cancelled => std::io::ErrorKind::Interrupted,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
