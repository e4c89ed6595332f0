//! Error types for the job pipeline.

use printagent_journal::JournalError;
use thiserror::Error;

/// Errors that may occur while handling a print job.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("not connected to the print server")]
    NotConnected,

    #[error("failed to emit {event}: {reason}")]
    Emit { event: &'static str, reason: String },

    #[error("no print recorded for invoice {0}")]
    NotFound(String),

    #[error("print failed: {0}")]
    PrintFailed(String),

    #[error(transparent)]
    Journal(#[from] JournalError),
}
