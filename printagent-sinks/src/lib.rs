//! Print Sink backends.

mod error;
mod spooler;
mod tcp;

use std::str::FromStr;
use std::sync::Arc;

use printagent_job_queue::{PrintOutcome, PrintSink};

pub use error::SinkError;
pub use spooler::SpoolerSink;
pub use tcp::{TcpSink, RAW_PORT};

/// Accepts every job without touching a printer.
#[derive(Debug, Default, Clone)]
pub struct DryRunSink;

impl PrintSink for DryRunSink {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn print(&self, printer: &str, payload: &[u8]) -> PrintOutcome {
        tracing::info!(printer, bytes = payload.len(), "dry run, nothing sent");
        PrintOutcome::ok(format!("Skipped printed via {printer}"))
    }
}

/// Picks TCP for `tcp://` targets and the spooler for everything else.
#[derive(Debug, Default, Clone)]
pub struct AutoSink {
    tcp: TcpSink,
    spooler: SpoolerSink,
}

impl PrintSink for AutoSink {
    fn name(&self) -> &str {
        "auto"
    }

    fn print(&self, printer: &str, payload: &[u8]) -> PrintOutcome {
        if printer.starts_with("tcp://") {
            self.tcp.print(printer, payload)
        } else {
            self.spooler.print(printer, payload)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Auto,
    Spooler,
    Tcp,
    DryRun,
}

impl FromStr for Backend {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "spooler" => Ok(Backend::Spooler),
            "tcp" => Ok(Backend::Tcp),
            "dry-run" | "dryrun" | "none" => Ok(Backend::DryRun),
            other => Err(SinkError::UnknownBackend(other.to_owned())),
        }
    }
}

pub fn build_sink(backend: Backend) -> Arc<dyn PrintSink> {
    match backend {
        Backend::Auto => Arc::new(AutoSink::default()),
        Backend::Spooler => Arc::new(SpoolerSink::new()),
        Backend::Tcp => Arc::new(TcpSink::default()),
        Backend::DryRun => Arc::new(DryRunSink),
    }
}
