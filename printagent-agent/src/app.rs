//! Agent wiring and the control loop.
//!
//! One task owns the reaction to connection events and operator commands.
//! Each inbound job runs on its own task (tracked in a `JoinSet`) so a slow
//! printer never stalls the socket.

use std::sync::Arc;
use std::time::Duration;

use printagent_config::{AgentSettings, Config};
use printagent_db_connection::DbConnectionConfig;
use printagent_job_queue::{
    Acknowledger, AgentEvent, Dispatcher, EventBus, HistoryEntry, Job, MissingOutcome,
    MissingRequester, PrintGate, PrintSink, ServerLink, SharedDispatcher, Trigger,
};
use printagent_journal::JobLog;
use printagent_link::{ConnectionState, LinkEvent, LinkHandle, LinkOptions};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::AgentError;
use crate::state::SharedSettings;
use crate::transport::LinkTransport;

const COMMAND_CAPACITY: usize = 32;
const HISTORY_ROWS: u32 = 50;

/// Environment prefix for pool tuning (`PRINTAGENT_DB_MAX_CONNECTIONS`, ...).
pub const DB_ENV_PREFIX: &str = "PRINTAGENT";

/// Open the journal named by the configuration, creating it if needed.
pub async fn open_journal(config: &Config) -> Result<JobLog, AgentError> {
    let db =
        DbConnectionConfig::for_path(config.database_path()).with_env_overrides(DB_ENV_PREFIX)?;
    tracing::info!(
        db_url = %db.url,
        max_connections = db.max_connections,
        "opening print journal"
    );
    Ok(JobLog::open(&db).await?)
}

#[derive(Debug)]
pub enum AgentCommand {
    /// Connect if currently offline.
    Reconnect,
    RequestMissing(Option<oneshot::Sender<MissingOutcome>>),
    Reconfigure(AgentSettings),
    Shutdown,
}

/// Cloneable control surface of a running agent.
#[derive(Clone)]
pub struct AgentHandle {
    cmd_tx: mpsc::Sender<AgentCommand>,
    events: EventBus,
    link: LinkHandle,
    dispatcher: SharedDispatcher,
    settings: SharedSettings,
}

impl AgentHandle {
    async fn send(&self, cmd: AgentCommand) -> Result<(), AgentError> {
        self.cmd_tx.send(cmd).await.map_err(|_| AgentError::Stopped)
    }

    pub async fn reconnect(&self) -> Result<(), AgentError> {
        self.send(AgentCommand::Reconnect).await
    }

    /// Manual redelivery request, subject to the cooldown.
    pub async fn request_missing(&self) -> Result<MissingOutcome, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.send(AgentCommand::RequestMissing(Some(tx))).await?;
        rx.await.map_err(|_| AgentError::Stopped)
    }

    pub async fn reconfigure(&self, settings: AgentSettings) -> Result<(), AgentError> {
        self.send(AgentCommand::Reconfigure(settings)).await
    }

    pub async fn shutdown(&self) -> Result<(), AgentError> {
        self.send(AgentCommand::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn dispatcher(&self) -> &SharedDispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> Arc<AgentSettings> {
        self.settings.current()
    }
}

/// Tunables that come from `Config` but not from `AgentSettings`.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub link: LinkOptions,
    pub fingerprint_window: Duration,
    pub print_timeout: Duration,
    pub serialize_prints: bool,
    pub ack_timeout: Duration,
    pub missing_cooldown: Duration,
}

impl AgentOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            link: LinkOptions::from_config(cfg),
            fingerprint_window: cfg.fingerprint_window(),
            print_timeout: cfg.print_timeout(),
            serialize_prints: cfg.printer.serialize,
            ack_timeout: Duration::from_secs(cfg.connection.ack_timeout_secs),
            missing_cooldown: cfg.missing_request_cooldown(),
        }
    }
}

pub struct Agent;

impl Agent {
    /// Wire every component and start the control loop. The link starts
    /// connecting immediately when a credential is present. Subscribe to
    /// `events` before calling to see the startup history.
    pub fn start(
        settings: AgentSettings,
        options: AgentOptions,
        journal: JobLog,
        sink: Arc<dyn PrintSink>,
        events: EventBus,
    ) -> (AgentHandle, JoinHandle<()>) {
        let (link, link_events, link_task) =
            LinkHandle::spawn(settings.clone(), options.link.clone());
        let transport: Arc<dyn ServerLink> = Arc::new(LinkTransport::new(link.clone()));

        let dispatcher = build_dispatcher(
            &settings,
            &options,
            journal.clone(),
            sink,
            transport.clone(),
            events.clone(),
        );
        let missing = Arc::new(MissingRequester::new(transport, options.missing_cooldown));

        let shared = SharedSettings::new(settings);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);

        let handle = AgentHandle {
            cmd_tx,
            events: events.clone(),
            link: link.clone(),
            dispatcher: dispatcher.clone(),
            settings: shared.clone(),
        };

        let control = ControlLoop {
            link,
            link_events,
            link_task,
            cmd_rx,
            dispatcher,
            missing,
            journal,
            events,
            settings: shared,
            workers: JoinSet::new(),
        };
        let task = tokio::spawn(control.run());
        (handle, task)
    }

    /// A dispatcher whose link never connects, for one-shot printer commands
    /// (reprint, test print) that need the print path but not the server.
    pub fn offline_dispatcher(
        settings: &AgentSettings,
        options: &AgentOptions,
        journal: JobLog,
        sink: Arc<dyn PrintSink>,
    ) -> SharedDispatcher {
        let (link, _events, _task) = LinkHandle::spawn(settings.clone(), options.link.clone());
        let transport: Arc<dyn ServerLink> = Arc::new(LinkTransport::new(link));
        build_dispatcher(settings, options, journal, sink, transport, EventBus::new())
    }
}

fn build_dispatcher(
    settings: &AgentSettings,
    options: &AgentOptions,
    journal: JobLog,
    sink: Arc<dyn PrintSink>,
    transport: Arc<dyn ServerLink>,
    events: EventBus,
) -> SharedDispatcher {
    let acks = Acknowledger::new(
        transport,
        journal.clone(),
        events.clone(),
        options.ack_timeout,
    );
    let gate = PrintGate::new(sink, options.serialize_prints, options.print_timeout);
    tracing::info!(
        sink = gate.sink_name(),
        printer = %settings.printer_name,
        serialize = options.serialize_prints,
        "print path configured"
    );
    Arc::new(Dispatcher::new(
        settings.printer_name.clone(),
        options.fingerprint_window,
        gate,
        journal,
        acks,
        events,
    ))
}

struct ControlLoop {
    link: LinkHandle,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    link_task: JoinHandle<()>,
    cmd_rx: mpsc::Receiver<AgentCommand>,
    dispatcher: SharedDispatcher,
    missing: Arc<MissingRequester>,
    journal: JobLog,
    events: EventBus,
    settings: SharedSettings,
    workers: JoinSet<()>,
}

enum Step {
    Link(Option<LinkEvent>),
    Command(Option<AgentCommand>),
    WorkerDone(Result<(), tokio::task::JoinError>),
}

impl ControlLoop {
    async fn run(mut self) {
        self.publish_history().await;

        if self.settings.current().has_credential() {
            if self.link.connect().await.is_err() {
                tracing::error!("connection task is gone");
            }
        } else {
            tracing::warn!("no API key configured; waiting for settings");
        }

        loop {
            let step = tokio::select! {
                event = self.link_events.recv() => Step::Link(event),
                cmd = self.cmd_rx.recv() => Step::Command(cmd),
                Some(done) = self.workers.join_next(), if !self.workers.is_empty() => Step::WorkerDone(done),
            };

            match step {
                Step::Link(Some(event)) => self.on_link_event(event),
                Step::Link(None) => {
                    tracing::error!("connection task stopped unexpectedly");
                    break;
                }
                Step::Command(Some(AgentCommand::Shutdown)) | Step::Command(None) => break,
                Step::Command(Some(cmd)) => self.on_command(cmd).await,
                Step::WorkerDone(Err(e)) => tracing::error!(error = %e, "job worker panicked"),
                Step::WorkerDone(Ok(())) => {}
            }
        }

        self.stop().await;
    }

    async fn publish_history(&self) {
        match self.journal.recent(HISTORY_ROWS).await {
            Ok(rows) => {
                tracing::debug!(rows = rows.len(), "loaded print history");
                self.events.publish(AgentEvent::HistoryLoaded {
                    entries: rows.iter().map(HistoryEntry::from).collect(),
                });
            }
            Err(e) => tracing::error!(error = %e, "failed to load print history"),
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { sid } => {
                self.events.publish(AgentEvent::ConnectionChanged {
                    connected: true,
                    detail: sid,
                });
                self.spawn_reconcile();
            }
            LinkEvent::Disconnected(reason) => {
                self.events.publish(AgentEvent::ConnectionChanged {
                    connected: false,
                    detail: reason.to_string(),
                });
            }
            LinkEvent::ConnectError { reason } => {
                self.events.publish(AgentEvent::ConnectionChanged {
                    connected: false,
                    detail: reason,
                });
            }
            LinkEvent::PrintLabel(label) => {
                let job = Job::from_parts(label.job_id, label.invoice, label.pcs, label.data);
                tracing::info!(job = %job.describe(), "job received");
                let dispatcher = self.dispatcher.clone();
                self.workers.spawn(async move {
                    let disposition = dispatcher.handle_job(job).await;
                    tracing::debug!(?disposition, "job finished");
                });
            }
            LinkEvent::Status(status) => {
                self.events
                    .publish(AgentEvent::ServerStatus { msg: status.msg });
            }
            LinkEvent::Other { name, .. } => tracing::debug!(event = %name, "unhandled server event"),
        }
    }

    /// After every connect: re-send outstanding acks, then ask for anything missed.
    fn spawn_reconcile(&mut self) {
        let acks = self.dispatcher.acknowledger().clone();
        let missing = self.missing.clone();
        let settings = self.settings.current();
        self.workers.spawn(async move {
            match acks.flush_pending().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(count = n, "re-sent pending acks"),
                Err(e) => tracing::error!(error = %e, "could not read pending acks"),
            }
            missing
                .request(settings.api_key.as_deref(), Trigger::OnConnect)
                .await;
        });
    }

    async fn on_command(&mut self, cmd: AgentCommand) {
        match cmd {
            AgentCommand::Reconnect => {
                if let Err(e) = self.link.connect().await {
                    tracing::error!(error = %e, "reconnect failed");
                }
            }
            AgentCommand::RequestMissing(reply) => {
                let settings = self.settings.current();
                let outcome = self
                    .missing
                    .request(settings.api_key.as_deref(), Trigger::Manual)
                    .await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            AgentCommand::Reconfigure(new) => self.reconfigure(new).await,
            AgentCommand::Shutdown => {}
        }
    }

    async fn reconfigure(&mut self, new: AgentSettings) {
        let old = self.settings.swap(new.clone());
        if old.printer_name != new.printer_name {
            self.dispatcher.set_printer(new.printer_name.clone()).await;
        }
        if old.server_url != new.server_url || old.api_key != new.api_key {
            tracing::info!(server = %new.server_url, "server settings changed, reconnecting");
            if let Err(e) = self.link.reconfigure(new).await {
                tracing::error!(error = %e, "could not reconfigure connection");
            }
        }
    }

    async fn stop(mut self) {
        tracing::info!(in_flight = self.workers.len(), "shutting down");
        let _ = self.link.disconnect().await;
        let _ = self.link.shutdown().await;

        while let Some(done) = self.workers.join_next().await {
            if let Err(e) = done {
                tracing::error!(error = %e, "job worker panicked");
            }
        }
        if let Err(e) = self.link_task.await {
            tracing::error!(error = %e, "connection task panicked");
        }
        self.journal.close().await;
        tracing::info!("agent stopped");
    }
}

/// Write pipeline events as status lines.
pub fn spawn_status_logger(mut rx: broadcast::Receiver<AgentEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "status logger fell behind")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &AgentEvent) {
    match event {
        AgentEvent::ConnectionChanged { connected: true, detail } => {
            tracing::info!(sid = %detail, "status: connected")
        }
        AgentEvent::ConnectionChanged { connected: false, detail } => {
            tracing::info!(%detail, "status: disconnected")
        }
        AgentEvent::ServerStatus { msg } => tracing::info!(%msg, "server"),
        AgentEvent::JobPrinted {
            job_id,
            invoice,
            copies,
            timestamp,
        } => tracing::info!(?job_id, %invoice, copies, %timestamp, "printed"),
        AgentEvent::JobSkipped {
            job_id,
            invoice,
            reason,
        } => tracing::info!(?job_id, %invoice, %reason, "skipped"),
        AgentEvent::JobFailed {
            job_id,
            invoice,
            error,
        } => tracing::warn!(?job_id, %invoice, %error, "print failed"),
        AgentEvent::AckSent { job_id } => tracing::debug!(job_id, "ack sent"),
        AgentEvent::AckPending { job_id } => tracing::debug!(job_id, "ack pending"),
        AgentEvent::HistoryLoaded { entries } => {
            for e in entries.iter().take(10) {
                tracing::info!(
                    job_id = ?e.job_id,
                    invoice = %e.invoice,
                    copies = e.copies,
                    timestamp = %e.timestamp,
                    acked = e.acknowledged,
                    "history"
                );
            }
        }
    }
}
