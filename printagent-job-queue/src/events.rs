//! One-way notifications from the pipeline to whatever presents it.

use printagent_journal::PrintRecord;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ConnectionChanged {
        connected: bool,
        detail: String,
    },
    ServerStatus {
        msg: String,
    },
    JobPrinted {
        job_id: Option<i64>,
        invoice: String,
        copies: u32,
        timestamp: String,
    },
    JobSkipped {
        job_id: Option<i64>,
        invoice: String,
        reason: String,
    },
    JobFailed {
        job_id: Option<i64>,
        invoice: String,
        error: String,
    },
    AckSent {
        job_id: i64,
    },
    AckPending {
        job_id: i64,
    },
    /// Most recent journal rows, newest first, published once at startup.
    HistoryLoaded {
        entries: Vec<HistoryEntry>,
    },
}

/// A journal row without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub job_id: Option<i64>,
    pub invoice: String,
    pub copies: u32,
    pub timestamp: String,
    pub acknowledged: bool,
}

impl From<&PrintRecord> for HistoryEntry {
    fn from(record: &PrintRecord) -> Self {
        Self {
            job_id: record.job_id,
            invoice: record.invoice.clone(),
            copies: record.copies,
            timestamp: record.timestamp.clone(),
            acknowledged: record.acknowledged,
        }
    }
}

/// Broadcast fan-out. Sending never blocks and never fails the pipeline;
/// slow subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: AgentEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}
