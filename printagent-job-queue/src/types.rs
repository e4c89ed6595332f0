//! Core types for the job pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One print request as received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Server-assigned identifier. Absent for senders that never label jobs.
    pub job_id: Option<i64>,
    pub invoice: String,
    /// Always at least 1.
    pub copies: u32,
    /// Raw label data, passed to the printer untouched.
    pub payload: String,
}

impl Job {
    /// Build a job from loosely-typed wire fields.
    ///
    /// A zero or negative `job_id` counts as absent; a missing, zero or
    /// negative copy count becomes 1.
    pub fn from_parts(
        job_id: Option<i64>,
        invoice: impl Into<String>,
        pcs: Option<i64>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.filter(|id| *id > 0),
            invoice: invoice.into(),
            copies: pcs
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(1),
            payload: payload.into(),
        }
    }

    /// Short label for log lines.
    pub fn describe(&self) -> String {
        match self.job_id {
            Some(id) => format!("job {} ({} x{})", id, self.invoice, self.copies),
            None => format!("{} x{}", self.invoice, self.copies),
        }
    }
}

/// Lifecycle of a job inside the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Received,
    Reserved,
    Printed,
    Failed,
    Acknowledged,
    /// Dropped by deduplication without reaching the printer.
    Skipped,
}

impl JobStatus {
    /// Returns true if no further transition is expected in this process.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Acknowledged | Self::Skipped)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Received => "received",
            Self::Reserved => "reserved",
            Self::Printed => "printed",
            Self::Failed => "failed",
            Self::Acknowledged => "acknowledged",
            Self::Skipped => "skipped",
        })
    }
}

/// In-memory trace of one `handle_job` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_id: Option<i64>,
    pub invoice: String,
    pub status: JobStatus,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub message: Option<String>,
}

impl JobRun {
    #[inline]
    pub fn new(job: &Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.job_id,
            invoice: job.invoice.clone(),
            status: JobStatus::Received,
            received_at: chrono::Utc::now(),
            finished_at: None,
            message: None,
        }
    }

    #[inline]
    pub fn reserve(&mut self) {
        self.status = JobStatus::Reserved;
    }

    #[inline]
    pub fn printed(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Printed;
        self.message = Some(message.into());
    }

    #[inline]
    pub fn acknowledged(&mut self) {
        self.status = JobStatus::Acknowledged;
        self.finished_at = Some(chrono::Utc::now());
    }

    #[inline]
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.finished_at = Some(chrono::Utc::now());
        self.message = Some(message.into());
    }

    #[inline]
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Skipped;
        self.finished_at = Some(chrono::Utc::now());
        self.message = Some(reason.into());
    }
}

/// Result of one Print Sink call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintOutcome {
    pub success: bool,
    pub message: String,
}

impl PrintOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
