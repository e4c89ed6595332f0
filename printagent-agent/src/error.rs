use thiserror::Error;

/// Errors raised while assembling the agent. Once running, the pipeline
/// reports failures as log lines and events instead.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] printagent_config::ConfigError),
    #[error("database error: {0}")]
    Database(#[from] printagent_db_connection::DbConnectionError),
    #[error("journal error: {0}")]
    Journal(#[from] printagent_journal::JournalError),
    #[error("printer error: {0}")]
    Sink(#[from] printagent_sinks::SinkError),
    #[error("connection error: {0}")]
    Link(#[from] printagent_link::LinkError),
    #[error("job pipeline error: {0}")]
    JobQueue(#[from] printagent_job_queue::JobQueueError),
    #[error("agent stopped")]
    Stopped,
}
