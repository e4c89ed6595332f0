//! Acknowledging printed jobs back to the server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use printagent_journal::JobLog;
use serde_json::{json, Value};

use crate::error::JobQueueError;
use crate::events::{AgentEvent, EventBus};

pub const ACK_EVENT: &str = "print_label_ack";

/// Outbound half of the server connection as the pipeline sees it.
#[async_trait]
pub trait ServerLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Send one event. `Ok` means the frame was handed to the transport.
    async fn emit(&self, event: &'static str, data: Value) -> Result<(), String>;
}

/// Wire body of `print_label_ack`.
pub fn ack_payload(job_id: i64) -> Value {
    json!({ "job_id": job_id, "status": "printed" })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Sent,
    /// Not connected; the row stays unacknowledged for the next flush.
    Pending,
    /// The emit itself failed; also left for the next flush.
    Failed(String),
}

#[derive(Clone)]
pub struct Acknowledger {
    link: Arc<dyn ServerLink>,
    journal: JobLog,
    events: EventBus,
    emit_timeout: Duration,
}

impl Acknowledger {
    pub fn new(
        link: Arc<dyn ServerLink>,
        journal: JobLog,
        events: EventBus,
        emit_timeout: Duration,
    ) -> Self {
        Self {
            link,
            journal,
            events,
            emit_timeout,
        }
    }

    /// Emit the ack for `job_id` and mark its rows acknowledged once the emit succeeds.
    pub async fn ack(&self, job_id: i64) -> AckOutcome {
        if !self.link.is_connected() {
            tracing::info!(job_id, "ack pending");
            self.events.publish(AgentEvent::AckPending { job_id });
            return AckOutcome::Pending;
        }

        let sent = tokio::time::timeout(
            self.emit_timeout,
            self.link.emit(ACK_EVENT, ack_payload(job_id)),
        )
        .await;

        let failure = match sent {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(format!(
                "no response within {}s",
                self.emit_timeout.as_secs_f32()
            )),
        };
        if let Some(reason) = failure {
            tracing::warn!(job_id, %reason, "ack error, will retry after reconnect");
            self.events.publish(AgentEvent::AckPending { job_id });
            return AckOutcome::Failed(reason);
        }

        // The server has the ack; a failed update only means a harmless re-send later.
        if let Err(e) = self.journal.mark_acked(job_id).await {
            tracing::error!(job_id, error = %e, "ack sent but journal update failed");
        }
        tracing::debug!(job_id, "ack sent");
        self.events.publish(AgentEvent::AckSent { job_id });
        AckOutcome::Sent
    }

    /// Re-send acks for every printed-but-unacknowledged job. Returns how many went out.
    pub async fn flush_pending(&self) -> Result<usize, JobQueueError> {
        let pending = self.journal.pending_acks().await?;
        if pending.is_empty() {
            return Ok(0);
        }
        tracing::info!(count = pending.len(), "flushing pending acks");

        let mut sent = 0;
        for job_id in pending {
            match self.ack(job_id).await {
                AckOutcome::Sent => sent += 1,
                AckOutcome::Pending => break,
                AckOutcome::Failed(_) => {
                    if !self.link.is_connected() {
                        break;
                    }
                }
            }
        }
        Ok(sent)
    }
}
