use sqlx::migrate::{MigrateError, Migrator};
use sqlx::SqlitePool;

pub static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("src/migrations");

pub fn sqlite_migrator() -> &'static Migrator {
    &SQLITE_MIGRATOR
}

/// Bring the journal schema up to date.
///
/// Databases written by earlier installations may already hold a `prints`
/// table without the `acked` column. The migrator leaves such a table alone,
/// so the column is added here; existing rows read as not acknowledged.
pub async fn run(pool: &SqlitePool) -> Result<(), MigrateError> {
    SQLITE_MIGRATOR.run(pool).await?;

    if !has_column(pool, "prints", "acked").await? {
        tracing::info!("upgrading legacy prints table: adding acked column");
        sqlx::query("ALTER TABLE prints ADD COLUMN acked INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_prints_job_acked ON prints(job_id, acked)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_prints_invoice ON prints(invoice)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use printagent_db_connection::{create_pool, DbConnectionConfig};

    #[tokio::test]
    async fn fresh_database_gets_full_schema() {
        let pool = create_pool(&DbConnectionConfig::in_memory()).await.unwrap();
        run(&pool).await.unwrap();
        assert!(has_column(&pool, "prints", "acked").await.unwrap());
        assert!(has_column(&pool, "prints", "payload").await.unwrap());
        // idempotent
        run(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn legacy_table_is_upgraded_without_losing_rows() {
        let pool = create_pool(&DbConnectionConfig::in_memory()).await.unwrap();
        sqlx::query(
            "CREATE TABLE prints (id INTEGER PRIMARY KEY AUTOINCREMENT, job_id INTEGER, \
             invoice TEXT, pcs INTEGER, payload TEXT, timestamp TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO prints (job_id, invoice, pcs, payload, timestamp) \
             VALUES (7, 'INV-7', 2, '^XA^XZ', '2024-01-01T10:00:00')",
        )
        .execute(&pool)
        .await
        .unwrap();

        run(&pool).await.unwrap();

        let (job_id, acked): (i64, i64) = sqlx::query_as("SELECT job_id, acked FROM prints")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(job_id, 7);
        assert_eq!(acked, 0);
    }
}
