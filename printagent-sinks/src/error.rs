use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unknown printer backend: {0}")]
    UnknownBackend(String),

    #[error("invalid printer target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("printer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("spooler rejected job: {0}")]
    Spooler(String),
}
