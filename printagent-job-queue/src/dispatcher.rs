//! Per-job state machine: dedupe, print, persist, acknowledge.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use printagent_journal::{AckState, JobLog, NewPrint, TIMESTAMP_FORMAT};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::ack::{AckOutcome, Acknowledger};
use crate::error::JobQueueError;
use crate::events::{AgentEvent, EventBus};
use crate::fingerprint::{fingerprint, FingerprintCache};
use crate::reservation::ReservationTable;
use crate::sink::PrintGate;
use crate::tracker::JobTracker;
use crate::types::{Job, JobRun, PrintOutcome};

/// What `handle_job` did with a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Printed; `record_id` is `None` if the journal write failed.
    Printed {
        record_id: Option<i64>,
        ack: Option<AckOutcome>,
    },
    Failed(String),
    /// Same id is printing right now.
    InFlight,
    /// Printed and acknowledged earlier.
    AlreadyPrinted,
    /// Printed earlier but never acknowledged; the ack went out again instead.
    AckReemitted(AckOutcome),
    /// Unlabeled job with identical content inside the window.
    DuplicateSuppressed,
}

#[derive(Debug)]
struct DedupeState {
    reservations: ReservationTable,
    fingerprints: FingerprintCache,
}

enum Admission {
    Print { fingerprint: Option<String> },
    Reack(i64),
    Skip(Disposition),
}

pub struct Dispatcher {
    dedupe: Mutex<DedupeState>,
    printer: RwLock<String>,
    gate: PrintGate,
    journal: JobLog,
    acks: Acknowledger,
    events: EventBus,
    tracker: JobTracker,
}

impl Dispatcher {
    pub fn new(
        printer: impl Into<String>,
        fingerprint_window: Duration,
        gate: PrintGate,
        journal: JobLog,
        acks: Acknowledger,
        events: EventBus,
    ) -> Self {
        Self {
            dedupe: Mutex::new(DedupeState {
                reservations: ReservationTable::new(),
                fingerprints: FingerprintCache::new(fingerprint_window),
            }),
            printer: RwLock::new(printer.into()),
            gate,
            journal,
            acks,
            events,
            tracker: JobTracker::new(),
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn acknowledger(&self) -> &Acknowledger {
        &self.acks
    }

    pub async fn printer(&self) -> String {
        self.printer.read().await.clone()
    }

    /// Swap the target printer. Calls already past admission keep the old one.
    pub async fn set_printer(&self, printer: impl Into<String>) {
        let printer = printer.into();
        let mut current = self.printer.write().await;
        if *current != printer {
            tracing::info!(old = %current, new = %printer, "printer changed");
            *current = printer;
        }
    }

    /// Run one inbound job to completion.
    pub async fn handle_job(&self, job: Job) -> Disposition {
        let mut run = JobRun::new(&job);
        self.tracker.record(&run).await;

        let admission = self.admit(&job).await;
        let fingerprint = match admission {
            Admission::Skip(disposition) => {
                let reason = match &disposition {
                    Disposition::InFlight => "already in-flight",
                    Disposition::AlreadyPrinted => "already printed",
                    _ => "duplicate unlabeled job",
                };
                tracing::info!(job = %job.describe(), reason, "job ignored");
                run.skip(reason);
                self.tracker.record(&run).await;
                self.events.publish(AgentEvent::JobSkipped {
                    job_id: job.job_id,
                    invoice: job.invoice.clone(),
                    reason: reason.to_owned(),
                });
                return disposition;
            }
            Admission::Reack(job_id) => {
                tracing::info!(job_id, "job ignored (already printed, ack pending)");
                let outcome = self.acks.ack(job_id).await;
                run.skip("already printed, ack re-sent");
                self.tracker.record(&run).await;
                return Disposition::AckReemitted(outcome);
            }
            Admission::Print { fingerprint } => fingerprint,
        };

        run.reserve();
        self.tracker.record(&run).await;

        let printer = self.printer().await;
        let outcome = self.gate.print(&printer, job.payload.as_bytes()).await;

        if outcome.success {
            self.on_printed(&job, &mut run, outcome).await
        } else {
            self.on_failed(&job, &mut run, fingerprint, outcome).await
        }
    }

    /// Check-and-reserve under the dedupe lock.
    async fn admit(&self, job: &Job) -> Admission {
        let mut dedupe = self.dedupe.lock().await;

        let Some(job_id) = job.job_id else {
            let fp = fingerprint(job);
            return if dedupe.fingerprints.check_and_record(&fp, Instant::now()) {
                Admission::Print {
                    fingerprint: Some(fp),
                }
            } else {
                Admission::Skip(Disposition::DuplicateSuppressed)
            };
        };

        if dedupe.reservations.is_in_flight(job_id) {
            return Admission::Skip(Disposition::InFlight);
        }

        let recorded = match self.journal.ack_state(job_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(job_id, error = %e, "journal lookup failed; falling back to in-memory state");
                None
            }
        };
        // A print whose row could not be written still counts as printed.
        let recorded = recorded.or_else(|| {
            dedupe
                .reservations
                .is_printed(job_id)
                .then_some(AckState::Pending)
        });

        match recorded {
            Some(AckState::Acknowledged) => Admission::Skip(Disposition::AlreadyPrinted),
            Some(AckState::Pending) => Admission::Reack(job_id),
            None => {
                dedupe.reservations.try_reserve(job_id);
                Admission::Print { fingerprint: None }
            }
        }
    }

    async fn on_printed(&self, job: &Job, run: &mut JobRun, outcome: PrintOutcome) -> Disposition {
        tracing::info!(job = %job.describe(), message = %outcome.message, "printed");
        if let Some(job_id) = job.job_id {
            self.dedupe.lock().await.reservations.complete(job_id);
        }
        run.printed(outcome.message);
        self.tracker.record(run).await;

        let now = Local::now();
        let record_id = match self
            .journal
            .record_print_at(
                NewPrint {
                    job_id: job.job_id,
                    invoice: &job.invoice,
                    copies: job.copies,
                    payload: &job.payload,
                },
                now,
            )
            .await
        {
            Ok(id) => {
                if let Some(job_id) = job.job_id {
                    self.dedupe.lock().await.reservations.persisted(job_id);
                }
                Some(id)
            }
            Err(e) => {
                tracing::error!(
                    job = %job.describe(),
                    error = %e,
                    "PRINTED JOB NOT PERSISTED: a restart may reprint it"
                );
                None
            }
        };

        self.events.publish(AgentEvent::JobPrinted {
            job_id: job.job_id,
            invoice: job.invoice.clone(),
            copies: job.copies,
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
        });

        let ack = match job.job_id {
            Some(job_id) => {
                let ack = self.acks.ack(job_id).await;
                if ack == AckOutcome::Sent {
                    run.acknowledged();
                    self.tracker.record(run).await;
                }
                Some(ack)
            }
            None => None,
        };

        Disposition::Printed { record_id, ack }
    }

    async fn on_failed(
        &self,
        job: &Job,
        run: &mut JobRun,
        fingerprint: Option<String>,
        outcome: PrintOutcome,
    ) -> Disposition {
        {
            let mut dedupe = self.dedupe.lock().await;
            if let Some(job_id) = job.job_id {
                dedupe.reservations.release(job_id);
            }
            if let Some(fp) = &fingerprint {
                dedupe.fingerprints.forget(fp);
            }
        }
        tracing::warn!(job = %job.describe(), error = %outcome.message, "print failed");
        run.fail(outcome.message.clone());
        self.tracker.record(run).await;
        self.events.publish(AgentEvent::JobFailed {
            job_id: job.job_id,
            invoice: job.invoice.clone(),
            error: outcome.message.clone(),
        });
        Disposition::Failed(outcome.message)
    }

    /// Print the latest stored label for `invoice` again. Not journaled, not acknowledged.
    pub async fn reprint(&self, invoice: &str) -> Result<PrintOutcome, JobQueueError> {
        let record = self
            .journal
            .latest_for_invoice(invoice)
            .await?
            .ok_or_else(|| JobQueueError::NotFound(invoice.to_owned()))?;
        tracing::info!(invoice, copies = record.copies, "re-printing");
        let printer = self.printer().await;
        let outcome = self.gate.print(&printer, record.payload.as_bytes()).await;
        if outcome.success {
            Ok(outcome)
        } else {
            Err(JobQueueError::PrintFailed(outcome.message))
        }
    }

    /// Send raw data straight to the printer, bypassing dedupe and the journal.
    pub async fn test_print(&self, payload: &str) -> PrintOutcome {
        let printer = self.printer().await;
        tracing::info!(%printer, "test print");
        self.gate.print(&printer, payload.as_bytes()).await
    }
}

/// Shared handle used by the agent's spawned job tasks.
pub type SharedDispatcher = Arc<Dispatcher>;
