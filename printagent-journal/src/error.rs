use printagent_db_connection::DbConnectionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to open journal: {0}")]
    Connection(#[from] DbConnectionError),
    #[error("journal migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("journal query failed: {0}")]
    Database(#[from] sqlx::Error),
}
