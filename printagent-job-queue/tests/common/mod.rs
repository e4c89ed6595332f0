#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use printagent_db_connection::DbConnectionConfig;
use printagent_job_queue::{
    async_trait, Acknowledger, Dispatcher, EventBus, PrintGate, PrintOutcome, PrintSink,
    ServerLink,
};
use printagent_journal::JobLog;
use serde_json::Value;

pub const PRINTER: &str = "ZPL500";

/// One-shot gate a blocking sink call can wait on.
#[derive(Default)]
pub struct Latch {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(String, Vec<u8>)>>,
    started: AtomicUsize,
    fail: AtomicBool,
    latch: Option<Arc<Latch>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call blocks until `latch` opens.
    pub fn held(latch: Arc<Latch>) -> Arc<Self> {
        Arc::new(Self {
            latch: Some(latch),
            ..Self::default()
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
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
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(latch) = &self.latch {
            latch.wait();
        }
        if self.fail.load(Ordering::SeqCst) {
            return PrintOutcome::failed("Print error: paper out");
        }
        self.calls
            .lock()
            .unwrap()
            .push((printer.to_owned(), payload.to_vec()));
        PrintOutcome::ok(format!("Printed via {printer}"))
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    connected: AtomicBool,
    failing: AtomicBool,
    emits: Mutex<Vec<(String, Value)>>,
}

impl RecordingTransport {
    pub fn connected() -> Arc<Self> {
        let t = Arc::new(Self::default());
        t.set_connected(true);
        t
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn emits(&self) -> Vec<(String, Value)> {
        self.emits.lock().unwrap().clone()
    }

    pub fn emits_of(&self, event: &str) -> Vec<Value> {
        self.emits()
            .into_iter()
            .filter(|(name, _)| name == event)
            .map(|(_, data)| data)
            .collect()
    }
}

#[async_trait]
impl ServerLink for RecordingTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: &'static str, data: Value) -> Result<(), String> {
        if !self.is_connected() {
            return Err("not connected".into());
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err("transport closed".into());
        }
        self.emits.lock().unwrap().push((event.to_owned(), data));
        Ok(())
    }
}

pub async fn memory_journal() -> JobLog {
    JobLog::open(&DbConnectionConfig::in_memory())
        .await
        .expect("journal")
}

pub fn dispatcher(
    sink: Arc<RecordingSink>,
    link: Arc<RecordingTransport>,
    journal: JobLog,
    window: Duration,
) -> Arc<Dispatcher> {
    let events = EventBus::new();
    let acks = Acknowledger::new(link, journal.clone(), events.clone(), Duration::from_secs(5));
    let gate = PrintGate::new(sink, true, Duration::from_secs(5));
    Arc::new(Dispatcher::new(PRINTER, window, gate, journal, acks, events))
}

/// Poll until `f` holds or a second passes.
pub async fn wait_for(mut f: impl FnMut() -> bool) {
    for _ in 0..200 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
