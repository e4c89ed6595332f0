//! Print Sink seam and the gate every print call goes through.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::types::PrintOutcome;

/// Synchronous, possibly slow call that pushes a payload to a printer.
///
/// Implementations report failure through [`PrintOutcome`]; they must not panic.
pub trait PrintSink: Send + Sync + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn print(&self, printer: &str, payload: &[u8]) -> PrintOutcome;
}

/// Runs sink calls on the blocking pool with a deadline.
///
/// With `serialize` set, at most one call reaches the sink at a time. A call
/// that overruns the deadline is reported as failed; its thread keeps the
/// slot until the driver actually returns.
#[derive(Clone)]
pub struct PrintGate {
    sink: Arc<dyn PrintSink>,
    slot: Option<Arc<Semaphore>>,
    timeout: Duration,
}

impl fmt::Debug for PrintGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintGate")
            .field("sink", &self.sink.name())
            .field("serialized", &self.slot.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PrintGate {
    pub fn new(sink: Arc<dyn PrintSink>, serialize: bool, timeout: Duration) -> Self {
        Self {
            sink,
            slot: serialize.then(|| Arc::new(Semaphore::new(1))),
            timeout,
        }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Print once and wait for the outcome.
    pub async fn print(&self, printer: &str, payload: &[u8]) -> PrintOutcome {
        let permit = match &self.slot {
            Some(slot) => match Arc::clone(slot).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return PrintOutcome::failed("print queue closed"),
            },
            None => None,
        };

        let sink = Arc::clone(&self.sink);
        let printer = printer.to_owned();
        let payload = payload.to_vec();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            sink.print(&printer, &payload)
        });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => PrintOutcome::failed(format!("print task aborted: {e}")),
            Err(_) => PrintOutcome::failed(format!(
                "print did not finish within {}s",
                self.timeout.as_secs_f32()
            )),
        }
    }
}
