#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use printagent_agent::AgentOptions;
use printagent_config::AgentSettings;
use printagent_db_connection::DbConnectionConfig;
use printagent_job_queue::{AgentEvent, PrintOutcome, PrintSink};
use printagent_journal::JobLog;
use printagent_link::LinkOptions;
use tokio::sync::broadcast;

pub const PRINTER: &str = "ZPL500";
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl PrintSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn print(&self, printer: &str, payload: &[u8]) -> PrintOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((printer.to_owned(), payload.to_vec()));
        PrintOutcome::ok(format!("Printed via {printer}"))
    }
}

pub fn settings(url: &str, key: Option<&str>) -> AgentSettings {
    AgentSettings {
        server_url: url.to_owned(),
        api_key: key.map(str::to_owned),
        printer_name: PRINTER.to_owned(),
    }
}

pub fn options() -> AgentOptions {
    AgentOptions {
        link: LinkOptions {
            reconnect_interval: Duration::from_millis(100),
            reconnect_max_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(2),
        },
        fingerprint_window: Duration::from_secs(60),
        print_timeout: Duration::from_secs(5),
        serialize_prints: true,
        ack_timeout: Duration::from_secs(2),
        missing_cooldown: Duration::from_secs(2),
    }
}

pub async fn memory_journal() -> JobLog {
    JobLog::open(&DbConnectionConfig::in_memory()).await.unwrap()
}

/// Wait for the first event matching `pred`.
pub async fn expect_event<F>(rx: &mut broadcast::Receiver<AgentEvent>, mut pred: F) -> AgentEvent
where
    F: FnMut(&AgentEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(left, rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return event,
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("event bus closed"),
            Err(_) => panic!("timed out waiting for agent event"),
        }
    }
}

pub fn is_online(e: &AgentEvent) -> bool {
    matches!(e, AgentEvent::ConnectionChanged { connected: true, .. })
}

/// Poll `check` until it holds or `WAIT` elapses.
pub async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
