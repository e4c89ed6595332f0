use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use printagent_job_queue::{PrintOutcome, PrintSink};

use crate::error::SinkError;

/// Hands raw data to the operating system's print path.
///
/// - `\\host\share` and `/dev/...` targets are opened and written directly
///   (shared Windows printers, local device nodes).
/// - `file:<path>` writes to a regular file.
/// - Any other name is a queue name, submitted with `lp -d <name> -o raw`.
#[derive(Debug, Clone)]
pub struct SpoolerSink {
    lp_command: String,
}

impl Default for SpoolerSink {
    fn default() -> Self {
        Self {
            lp_command: "lp".to_owned(),
        }
    }
}

impl SpoolerSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different submit command (same arguments as `lp`).
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            lp_command: command.into(),
        }
    }

    fn write_device(path: &Path, payload: &[u8]) -> Result<(), SinkError> {
        let mut device = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        device.write_all(payload)?;
        device.flush()?;
        Ok(())
    }

    fn submit(&self, queue: &str, payload: &[u8]) -> Result<String, SinkError> {
        let mut child = Command::new(&self.lp_command)
            .args(["-d", queue, "-o", "raw"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload)?;
        }
        let output = child.wait_with_output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        } else {
            Err(SinkError::Spooler(
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            ))
        }
    }

    fn print_inner(&self, printer: &str, payload: &[u8]) -> Result<(), SinkError> {
        if printer.trim().is_empty() {
            return Err(SinkError::InvalidTarget {
                target: printer.to_owned(),
                reason: "no printer configured".to_owned(),
            });
        }
        if let Some(path) = printer.strip_prefix("file:") {
            return Self::write_device(Path::new(path), payload);
        }
        if printer.starts_with(r"\\") || printer.starts_with("/dev/") {
            return Self::write_device(Path::new(printer), payload);
        }
        let job = self.submit(printer, payload)?;
        tracing::debug!(printer, job = %job, "submitted to spooler");
        Ok(())
    }
}

impl PrintSink for SpoolerSink {
    fn name(&self) -> &str {
        "spooler"
    }

    fn print(&self, printer: &str, payload: &[u8]) -> PrintOutcome {
        match self.print_inner(printer, payload) {
            Ok(()) => PrintOutcome::ok(format!("Printed via {printer}")),
            Err(e) => PrintOutcome::failed(format!("Print error: {e}")),
        }
    }
}
