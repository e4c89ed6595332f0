use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no API key configured")]
    MissingCredential,

    #[error("connection timeout ({0:?})")]
    Timeout(std::time::Duration),

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server rejected connection: {0}")]
    Rejected(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection task stopped")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LinkError::WebSocket(Box::new(e))
    }
}
