pub mod config;
pub mod error;
pub mod pool;

pub use config::DbConnectionConfig;
pub use error::DbConnectionError;
pub use pool::{create_pool, is_memory_url, DbPool};
