//! Connection manager: a single background task that owns the WebSocket.
//!
//! The public [`LinkHandle`] sends commands to the task; the task reports
//! lifecycle changes and server events on an unbounded channel and
//! publishes its [`ConnectionState`] through a watch channel.
//!
//! - At most one connection; `connect` while connecting or connected is a no-op
//! - Without a credential the task stays disconnected and arms no timer
//! - Any failure or drop arms one reconnect timer; explicit disconnect cancels it
//! - Heartbeat: silence longer than `pingInterval + pingTimeout` drops the link

use std::sync::Once;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use printagent_config::{AgentSettings, Config};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::LinkError;
use crate::messages::{PrintLabel, StatusMessage, PRINT_LABEL_EVENT, STATUS_EVENT};
use crate::protocol::{
    connect_frame, endpoint_url, event_frame, EnginePacket, OpenInfo, SocketPacket,
    DEFAULT_NAMESPACE,
};
use crate::state::{ConnectionState, DisconnectReason};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CMD_CAPACITY: usize = 64;

/// Far enough ahead to mean "never" without overflowing `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    pub reconnect_interval: Duration,
    /// Equal to `reconnect_interval` for a fixed schedule; larger values double the delay up to this cap.
    pub reconnect_max_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(5),
            reconnect_max_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl LinkOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let c = &cfg.connection;
        Self {
            reconnect_interval: Duration::from_secs(c.reconnect_interval_secs),
            reconnect_max_interval: Duration::from_secs(
                c.reconnect_max_interval_secs.max(c.reconnect_interval_secs),
            ),
            connect_timeout: Duration::from_secs(c.connect_timeout_secs),
        }
    }
}

/// Notifications from the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected { sid: String },
    Disconnected(DisconnectReason),
    ConnectError { reason: String },
    PrintLabel(PrintLabel),
    Status(StatusMessage),
    /// Any event the agent has no handler for.
    Other { name: String, args: Vec<Value> },
}

enum LinkCmd {
    Connect,
    Disconnect,
    Reconfigure(AgentSettings),
    Emit {
        event: String,
        data: Value,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Shutdown,
}

/// Cloneable front end of the connection task.
#[derive(Clone)]
pub struct LinkHandle {
    cmd_tx: mpsc::Sender<LinkCmd>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

impl LinkHandle {
    /// Start the connection task in the `Disconnected` state. Call [`connect`](Self::connect) to go online.
    pub fn spawn(
        settings: AgentSettings,
        options: LinkOptions,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>, JoinHandle<()>) {
        install_crypto_provider();
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CAPACITY);
        // Unbounded so the task never waits on a consumer that is itself waiting on the task.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = Actor {
            retry_delay: options.reconnect_interval,
            settings,
            options,
            cmd_rx,
            events_tx,
            state_tx,
            ws: None,
            heartbeat: FAR_FUTURE,
            heartbeat_deadline: Instant::now() + FAR_FUTURE,
            reconnect_at: None,
            shutdown: false,
        };
        let task = tokio::spawn(actor.run());
        (Self { cmd_tx, state_rx }, events_rx, task)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn send(&self, cmd: LinkCmd) -> Result<(), LinkError> {
        self.cmd_tx.send(cmd).await.map_err(|_| LinkError::Closed)
    }

    pub async fn connect(&self) -> Result<(), LinkError> {
        self.send(LinkCmd::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.send(LinkCmd::Disconnect).await
    }

    /// Replace endpoint/credential: disconnects, then connects with the new values.
    pub async fn reconfigure(&self, settings: AgentSettings) -> Result<(), LinkError> {
        self.send(LinkCmd::Reconfigure(settings)).await
    }

    /// Send one event; resolves once the frame is written.
    pub async fn emit(&self, event: &str, data: Value) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.send(LinkCmd::Emit {
            event: event.to_owned(),
            data,
            reply,
        })
        .await?;
        rx.await.map_err(|_| LinkError::Closed)?
    }

    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.send(LinkCmd::Shutdown).await
    }
}

/// `wss://` needs a process-wide rustls provider; the first caller installs ring.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

enum Wake {
    Cmd(Option<LinkCmd>),
    Frame(Option<Result<Message, tungstenite::Error>>),
    HeartbeatLost,
    ReconnectDue,
}

struct Actor {
    settings: AgentSettings,
    options: LinkOptions,
    cmd_rx: mpsc::Receiver<LinkCmd>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
    ws: Option<WsStream>,
    heartbeat: Duration,
    heartbeat_deadline: Instant,
    reconnect_at: Option<Instant>,
    retry_delay: Duration,
    shutdown: bool,
}

impl Actor {
    async fn run(mut self) {
        while !self.shutdown {
            let wake = match self.ws.as_mut() {
                Some(ws) => tokio::select! {
                    cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                    frame = ws.next() => Wake::Frame(frame),
                    _ = sleep_until(self.heartbeat_deadline) => Wake::HeartbeatLost,
                },
                None => {
                    let due = self.reconnect_at;
                    tokio::select! {
                        cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                        _ = sleep_until(due.unwrap_or_else(|| Instant::now() + FAR_FUTURE)), if due.is_some() => {
                            Wake::ReconnectDue
                        }
                    }
                }
            };

            match wake {
                Wake::Cmd(Some(cmd)) => self.handle_cmd(cmd).await,
                // Every handle is gone.
                Wake::Cmd(None) => self.shutdown = true,
                Wake::Frame(frame) => self.handle_frame(frame).await,
                Wake::HeartbeatLost => {
                    let reason = format!("ping timeout ({:?})", self.heartbeat);
                    self.drop_connection(DisconnectReason::new(reason));
                }
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    tracing::info!("Reconnecting…");
                    self.connect().await;
                }
            }
        }

        self.reconnect_at = None;
        if self.ws.is_some() {
            self.close_gracefully(DisconnectReason::requested("shutting down"))
                .await;
        }
        tracing::debug!("connection task stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "connection state");
        }
    }

    fn notify(&self, event: LinkEvent) {
        // Receiver dropped means nobody is listening any more.
        let _ = self.events_tx.send(event);
    }

    async fn handle_cmd(&mut self, cmd: LinkCmd) {
        match cmd {
            LinkCmd::Connect => self.connect().await,
            LinkCmd::Disconnect => self.disconnect().await,
            LinkCmd::Reconfigure(settings) => {
                tracing::info!(server = %settings.server_url, "connection settings changed");
                self.settings = settings;
                self.disconnect().await;
                self.connect().await;
            }
            LinkCmd::Emit { event, data, reply } => {
                let result = self.emit(&event, data).await;
                let _ = reply.send(result);
            }
            LinkCmd::Shutdown => self.shutdown = true,
        }
    }

    async fn connect(&mut self) {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            tracing::debug!(%state, "connect ignored");
            return;
        }

        let api_key = match &self.settings.api_key {
            Some(key) if !key.trim().is_empty() && !self.settings.server_url.trim().is_empty() => {
                key.clone()
            }
            _ => {
                tracing::warn!("Missing API key or URL; staying disconnected");
                self.reconnect_at = None;
                self.notify(LinkEvent::ConnectError {
                    reason: LinkError::MissingCredential.to_string(),
                });
                return;
            }
        };

        let url = match endpoint_url(&self.settings.server_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "cannot connect");
                self.reconnect_at = None;
                self.notify(LinkEvent::ConnectError {
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.set_state(ConnectionState::Connecting);
        tracing::info!(%url, "connecting");

        let attempt = establish(url.to_string(), api_key, self.options.connect_timeout);
        tokio::pin!(attempt);

        let result = loop {
            tokio::select! {
                res = &mut attempt => break Some(res),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(LinkCmd::Connect) => tracing::debug!("connect already in progress"),
                    Some(LinkCmd::Emit { reply, .. }) => {
                        let _ = reply.send(Err(LinkError::NotConnected));
                    }
                    Some(LinkCmd::Disconnect) => {
                        self.reconnect_at = None;
                        break None;
                    }
                    Some(LinkCmd::Reconfigure(settings)) => {
                        self.settings = settings;
                        self.reconnect_at = Some(Instant::now());
                        break None;
                    }
                    Some(LinkCmd::Shutdown) | None => {
                        self.shutdown = true;
                        break None;
                    }
                },
            }
        };

        match result {
            Some(Ok((ws, info, sid))) => {
                self.ws = Some(ws);
                self.heartbeat = info.heartbeat_deadline();
                self.heartbeat_deadline = Instant::now() + self.heartbeat;
                self.reconnect_at = None;
                self.retry_delay = self.options.reconnect_interval;
                self.set_state(ConnectionState::Connected);
                tracing::info!(%sid, "Connected");
                self.notify(LinkEvent::Connected { sid });
            }
            Some(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                tracing::warn!(error = %e, "Connect failed");
                self.notify(LinkEvent::ConnectError {
                    reason: e.to_string(),
                });
                self.arm_reconnect();
            }
            None => {
                self.set_state(ConnectionState::Disconnected);
                tracing::debug!("connect attempt abandoned");
            }
        }
    }

    /// Explicit disconnect. Cancels any pending reconnect.
    async fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.retry_delay = self.options.reconnect_interval;
        if self.ws.is_none() {
            tracing::debug!("disconnect ignored: not connected");
            return;
        }
        self.close_gracefully(DisconnectReason::requested("disconnect requested"))
            .await;
    }

    async fn close_gracefully(&mut self, reason: DisconnectReason) {
        if let Some(mut ws) = self.ws.take() {
            let bye = SocketPacket::Disconnect {
                namespace: DEFAULT_NAMESPACE.to_owned(),
            }
            .to_frame();
            let _ = ws.send(Message::Text(bye.into())).await;
            let _ = ws.close(None).await;
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::info!(%reason, "Disconnected");
        self.notify(LinkEvent::Disconnected(reason));
    }

    /// Transport-level loss: forget the socket and schedule a retry.
    fn drop_connection(&mut self, reason: DisconnectReason) {
        self.ws = None;
        self.set_state(ConnectionState::Disconnected);
        tracing::warn!(%reason, "Disconnected");
        self.notify(LinkEvent::Disconnected(reason));
        self.arm_reconnect();
    }

    fn arm_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            return;
        }
        let delay = self.retry_delay;
        self.reconnect_at = Some(Instant::now() + delay);
        self.retry_delay = (delay * 2).min(self.options.reconnect_max_interval);
        tracing::info!(?delay, "reconnect scheduled");
    }

    async fn emit(&mut self, event: &str, data: Value) -> Result<(), LinkError> {
        let Some(ws) = self.ws.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        if let Err(e) = ws.send(Message::Text(event_frame(event, data).into())).await {
            let err = LinkError::from(e);
            self.drop_connection(DisconnectReason::new(format!("send failed: {err}")));
            return Err(err);
        }
        tracing::debug!(event, "emitted");
        Ok(())
    }

    async fn send_text(&mut self, text: String) {
        let Some(ws) = self.ws.as_mut() else {
            return;
        };
        if let Err(e) = ws.send(Message::Text(text.into())).await {
            self.drop_connection(DisconnectReason::new(format!("send failed: {e}")));
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
            Some(Ok(Message::Close(frame))) => {
                let reason = match frame {
                    Some(f) => DisconnectReason::with_code(f.reason.to_string(), f.code.into()),
                    None => DisconnectReason::new("server closed connection"),
                };
                self.drop_connection(reason);
            }
            Some(Ok(Message::Binary(_))) => tracing::debug!("ignoring binary frame"),
            // tungstenite answers websocket pings itself
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                self.drop_connection(DisconnectReason::new(format!("websocket error: {e}")))
            }
            None => self.drop_connection(DisconnectReason::new("websocket stream ended")),
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let packet = match EnginePacket::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable frame");
                return;
            }
        };
        self.heartbeat_deadline = Instant::now() + self.heartbeat;

        match packet {
            EnginePacket::Ping(data) => self.send_text(EnginePacket::Pong(data).encode()).await,
            EnginePacket::Close => {
                self.drop_connection(DisconnectReason::new("server closed session"))
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                Ok(SocketPacket::Event { name, args, id, .. }) => {
                    if let Some(id) = id {
                        let ack = SocketPacket::Ack {
                            namespace: DEFAULT_NAMESPACE.to_owned(),
                            id,
                            args: Vec::new(),
                        };
                        self.send_text(ack.to_frame()).await;
                    }
                    self.dispatch_event(name, args);
                }
                Ok(SocketPacket::Disconnect { .. }) => {
                    self.drop_connection(DisconnectReason::new("server disconnected"))
                }
                Ok(SocketPacket::ConnectError { data, .. }) => {
                    let msg = rejection_message(data);
                    self.drop_connection(DisconnectReason::new(format!("server error: {msg}")))
                }
                Ok(other) => tracing::debug!(?other, "ignoring packet"),
                Err(e) => tracing::warn!(error = %e, "unreadable packet"),
            },
            _ => {}
        }
    }

    fn dispatch_event(&self, name: String, args: Vec<Value>) {
        let first = args.first().cloned().unwrap_or(Value::Null);
        match name.as_str() {
            PRINT_LABEL_EVENT => match PrintLabel::from_value(&first) {
                Some(label) => {
                    tracing::debug!(job_id = ?label.job_id, invoice = %label.invoice, "print_label received");
                    self.notify(LinkEvent::PrintLabel(label));
                }
                None => tracing::warn!(data = %first, "malformed print_label ignored"),
            },
            STATUS_EVENT => {
                let status = StatusMessage::from_value(&first);
                tracing::info!(msg = %status.msg, "Server status");
                self.notify(LinkEvent::Status(status));
            }
            _ => self.notify(LinkEvent::Other { name, args }),
        }
    }
}

fn rejection_message(data: Option<Value>) -> String {
    match data {
        Some(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => "connection refused".to_owned(),
    }
}

async fn establish(
    url: String,
    api_key: String,
    timeout: Duration,
) -> Result<(WsStream, OpenInfo, String), LinkError> {
    tokio::time::timeout(timeout, handshake(url, api_key))
        .await
        .map_err(|_| LinkError::Timeout(timeout))?
}

/// WebSocket upgrade, Engine.IO open, then namespace connect with the credential.
async fn handshake(url: String, api_key: String) -> Result<(WsStream, OpenInfo, String), LinkError> {
    let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| match e {
            tungstenite::Error::Http(response) => match response.status().as_u16() {
                401 | 403 => LinkError::Rejected(format!("HTTP {}", response.status())),
                _ => LinkError::Protocol(format!("unexpected HTTP {}", response.status())),
            },
            other => LinkError::from(other),
        })?;

    let info = loop {
        match next_packet(&mut ws).await? {
            EnginePacket::Open(info) => break info,
            other => tracing::debug!(?other, "ignoring packet before open"),
        }
    };

    ws.send(Message::Text(connect_frame(&api_key).into())).await?;

    loop {
        match next_packet(&mut ws).await? {
            EnginePacket::Ping(data) => {
                ws.send(Message::Text(EnginePacket::Pong(data).encode().into()))
                    .await?;
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                SocketPacket::Connect { data, .. } => {
                    let sid = data
                        .as_ref()
                        .and_then(|d| d.get("sid"))
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                        .unwrap_or_else(|| info.sid.clone());
                    return Ok((ws, info, sid));
                }
                SocketPacket::ConnectError { data, .. } => {
                    return Err(LinkError::Rejected(rejection_message(data)));
                }
                other => tracing::debug!(?other, "ignoring packet during handshake"),
            },
            EnginePacket::Close => {
                return Err(LinkError::Protocol("session closed during handshake".into()))
            }
            _ => {}
        }
    }
}

async fn next_packet(ws: &mut WsStream) -> Result<EnginePacket, LinkError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return EnginePacket::decode(text.as_str()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(LinkError::Protocol(
                    "connection closed during handshake".into(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
