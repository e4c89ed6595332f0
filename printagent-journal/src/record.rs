use serde::Serialize;

/// Timestamp layout stored in the `prints.timestamp` column (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One successfully printed job as stored in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintRecord {
    pub record_id: i64,
    pub job_id: Option<i64>,
    pub invoice: String,
    pub copies: u32,
    pub payload: String,
    pub timestamp: String,
    pub acknowledged: bool,
}

/// Values for a row about to be appended.
#[derive(Debug, Clone, Copy)]
pub struct NewPrint<'a> {
    pub job_id: Option<i64>,
    pub invoice: &'a str,
    pub copies: u32,
    pub payload: &'a str,
}

/// Acknowledgment flag of the latest row for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Acknowledged,
}

// Rows from older installations may carry NULLs in any data column.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PrintRow {
    pub id: i64,
    pub job_id: Option<i64>,
    pub invoice: Option<String>,
    pub pcs: Option<i64>,
    pub payload: Option<String>,
    pub timestamp: Option<String>,
    pub acked: i64,
}

impl From<PrintRow> for PrintRecord {
    fn from(row: PrintRow) -> Self {
        Self {
            record_id: row.id,
            job_id: row.job_id,
            invoice: row.invoice.unwrap_or_default(),
            copies: row
                .pcs
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(1),
            payload: row.payload.unwrap_or_default(),
            timestamp: row.timestamp.unwrap_or_default(),
            acknowledged: row.acked != 0,
        }
    }
}
