use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::DbConnectionConfig;
use crate::error::DbConnectionError;

pub type DbPool = SqlitePool;

// SQLite memory database patterns
const SQLITE_MEMORY_PATTERNS: &[&[u8]] = &[b":memory:", b"mode=memory"];

/// True for DSNs that never touch the filesystem.
pub fn is_memory_url(url: &str) -> bool {
    let url_bytes = url.as_bytes();
    SQLITE_MEMORY_PATTERNS.iter().any(|pattern| {
        url_bytes
            .windows(pattern.len())
            .any(|w| w.eq_ignore_ascii_case(pattern))
    })
}

/// Open a pool for the journal database, creating the file and its directory if needed.
pub async fn create_pool(config: &DbConnectionConfig) -> Result<DbPool, DbConnectionError> {
    let url = config.url.trim();
    if url.is_empty() {
        return Err(DbConnectionError::EmptyDatabaseUrl);
    }

    let memory = is_memory_url(url);
    if !memory {
        ensure_parent_dir(url)?;
    }

    let mut connect = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .busy_timeout(config.busy_timeout());
    if !memory {
        connect = connect.journal_mode(SqliteJournalMode::Wal);
    }

    // Every connection to `:memory:` is its own database, so keep exactly one alive.
    let opts = if memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        let mut opts = SqlitePoolOptions::new().max_connections(config.max_connections);
        if let Some(idle) = config.idle_timeout() {
            opts = opts.idle_timeout(idle);
        }
        opts
    };

    let pool = opts
        .acquire_timeout(config.connect_timeout())
        .connect_with(connect)
        .await?;
    tracing::debug!(memory, "journal pool opened");
    Ok(pool)
}

/// Extract the file path from a SQLite connection URL.
fn extract_path(url: &str) -> Option<&str> {
    let mut path = url;
    path = path
        .strip_prefix("sqlite://")
        .or_else(|| path.strip_prefix("sqlite:"))
        .unwrap_or(path);
    path = path.strip_prefix("file:").unwrap_or(path);

    if let Some(idx) = path.find('?') {
        path = &path[..idx];
    }

    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    // On Windows: strip leading slash before drive letter ("/C:/...")
    if path.len() > 2 && path.starts_with('/') && path.as_bytes().get(2) == Some(&b':') {
        Some(&path[1..])
    } else {
        Some(path)
    }
}

fn ensure_parent_dir(url: &str) -> Result<(), DbConnectionError> {
    let Some(clean_path) = extract_path(url) else {
        return Ok(());
    };

    let db_path = std::path::Path::new(clean_path);
    if let Some(parent) = db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty() && !p.exists())
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbConnectionError::FileCreation(format!(
                "failed to create parent directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_are_detected() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://file:journal?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite:///tmp/prints.db"));
    }

    #[test]
    fn extract_path_variants() {
        assert_eq!(extract_path("sqlite:///tmp/a.db"), Some("/tmp/a.db"));
        assert_eq!(extract_path("sqlite:data/a.db?mode=rwc"), Some("data/a.db"));
        assert_eq!(extract_path("sqlite:///C:/agent/a.db"), Some("C:/agent/a.db"));
        assert_eq!(extract_path("sqlite://"), None);
    }

    #[tokio::test]
    async fn creates_missing_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("deep").join("er").join("prints.db");
        let pool = create_pool(&DbConnectionConfig::for_path(&db))
            .await
            .expect("pool");
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        assert!(db.exists());
        pool.close().await;
    }

    #[tokio::test]
    async fn memory_pool_keeps_state_between_queries() {
        let pool = create_pool(&DbConnectionConfig::in_memory()).await.unwrap();
        sqlx::query("CREATE TABLE t(x INTEGER)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO t(x) VALUES (1)").execute(&pool).await.unwrap();
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn empty_url_rejected() {
        let err = create_pool(&DbConnectionConfig::new("  ")).await.unwrap_err();
        assert!(matches!(err, DbConnectionError::EmptyDatabaseUrl));
    }
}
