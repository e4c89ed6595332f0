//! Durable log of printed jobs.
//!
//! One SQLite file per installation. Each successful print appends a row to
//! `prints`; acknowledgment flips `acked` for every row of the job. The
//! latest row for a `job_id` is authoritative.

mod error;
mod record;

pub use error::JournalError;
pub use record::{AckState, NewPrint, PrintRecord, TIMESTAMP_FORMAT};

use chrono::{DateTime, Local};
use printagent_db_connection::{create_pool, DbConnectionConfig, DbPool};
use record::PrintRow;

const SELECT_COLUMNS: &str = "SELECT id, job_id, invoice, pcs, payload, timestamp, acked FROM prints";

#[derive(Debug, Clone)]
pub struct JobLog {
    pool: DbPool,
}

impl JobLog {
    /// Open (creating if needed) and migrate the journal described by `config`.
    pub async fn open(config: &DbConnectionConfig) -> Result<Self, JournalError> {
        let pool = create_pool(config).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, bringing its schema up to date first.
    pub async fn from_pool(pool: DbPool) -> Result<Self, JournalError> {
        printagent_migrations::run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Append a printed job with `acked = 0`, stamped with the current local time.
    pub async fn record_print(&self, new: NewPrint<'_>) -> Result<i64, JournalError> {
        self.record_print_at(new, Local::now()).await
    }

    pub async fn record_print_at(
        &self,
        new: NewPrint<'_>,
        at: DateTime<Local>,
    ) -> Result<i64, JournalError> {
        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        let result = sqlx::query(
            "INSERT INTO prints (job_id, invoice, pcs, payload, timestamp, acked) \
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(new.job_id)
        .bind(new.invoice)
        .bind(i64::from(new.copies))
        .bind(new.payload)
        .bind(&timestamp)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::debug!(record_id = id, job_id = ?new.job_id, invoice = new.invoice, "print recorded");
        Ok(id)
    }

    /// Acknowledgment state of the latest row for `job_id`, or `None` if never printed.
    pub async fn ack_state(&self, job_id: i64) -> Result<Option<AckState>, JournalError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT acked FROM prints WHERE job_id = ? ORDER BY id DESC LIMIT 1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(acked,)| {
            if acked != 0 {
                AckState::Acknowledged
            } else {
                AckState::Pending
            }
        }))
    }

    /// Mark every row of `job_id` acknowledged. Returns the number of rows touched.
    pub async fn mark_acked(&self, job_id: i64) -> Result<u64, JournalError> {
        let result = sqlx::query("UPDATE prints SET acked = 1 WHERE job_id = ? AND acked = 0")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Distinct job ids with an unacknowledged row, oldest first.
    pub async fn pending_acks(&self) -> Result<Vec<i64>, JournalError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT job_id FROM prints \
             WHERE job_id IS NOT NULL AND acked = 0 \
             GROUP BY job_id ORDER BY MIN(id)",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Most recent row printed for `invoice`.
    pub async fn latest_for_invoice(
        &self,
        invoice: &str,
    ) -> Result<Option<PrintRecord>, JournalError> {
        let sql = format!("{SELECT_COLUMNS} WHERE invoice = ? ORDER BY id DESC LIMIT 1");
        let row = sqlx::query_as::<_, PrintRow>(&sql)
            .bind(invoice)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Newest rows first, at most `limit` of them.
    pub async fn recent(&self, limit: u32) -> Result<Vec<PrintRecord>, JournalError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?");
        let rows = sqlx::query_as::<_, PrintRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
