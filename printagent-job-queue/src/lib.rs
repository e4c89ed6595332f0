//! Job intake pipeline for the print agent.
//!
//! Inbound jobs go through a [`Dispatcher`], which deduplicates them (by
//! `job_id` against in-flight reservations and the journal, or by content
//! fingerprint when no id is present), prints through a [`PrintGate`],
//! records the result and acknowledges it via an [`Acknowledger`].
//!
//! # Architecture
//!
//! - [`Dispatcher`] - per-job state machine
//! - [`PrintSink`] - synchronous printer seam, wrapped by [`PrintGate`]
//! - [`ServerLink`] - outbound half of the server connection
//! - [`Acknowledger`] - single-job ack and reconnect flush
//! - [`MissingRequester`] - rate-limited redelivery request
//! - [`EventBus`] - one-way notifications for presentation layers

mod ack;
mod dispatcher;
mod error;
mod events;
mod fingerprint;
mod missing;
mod reservation;
mod sink;
mod tracker;
mod types;

pub use ack::{ack_payload, AckOutcome, Acknowledger, ServerLink, ACK_EVENT};
pub use dispatcher::{Disposition, Dispatcher, SharedDispatcher};
pub use error::JobQueueError;
pub use events::{AgentEvent, EventBus, HistoryEntry};
pub use fingerprint::{fingerprint, FingerprintCache, DEFAULT_WINDOW};
pub use missing::{MissingOutcome, MissingRequester, Trigger, MISSING_EVENT};
pub use reservation::ReservationTable;
pub use sink::{PrintGate, PrintSink};
pub use tracker::JobTracker;
pub use types::{Job, JobRun, JobStatus, PrintOutcome};

// Re-export async_trait for convenience when implementing ServerLink
pub use async_trait::async_trait;
