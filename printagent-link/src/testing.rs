//! In-process Socket.IO server for tests.
//!
//! Speaks just enough Engine.IO/Socket.IO over a plain WebSocket to drive
//! the agent: open packet, namespace connect with credential check, events
//! in both directions and optional server pings.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::protocol::{event_frame, EnginePacket, OpenInfo, SocketPacket};

#[derive(Debug, Clone)]
pub struct FakeServerOptions {
    /// Required credential; `None` accepts any.
    pub api_key: Option<String>,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// Send Engine.IO pings every `ping_interval`.
    pub send_pings: bool,
    /// Accept the WebSocket but never send the open packet.
    pub mute: bool,
}

impl Default for FakeServerOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(20_000),
            send_pings: false,
            mute: false,
        }
    }
}

/// An event the client emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent {
    pub name: String,
    pub data: Value,
}

enum ServerCmd {
    Event(String, Value),
    Disconnect,
    Kick,
}

struct Shared {
    opts: FakeServerOptions,
    sessions: AtomicUsize,
    auths: Mutex<Vec<Value>>,
    current: Mutex<Option<mpsc::UnboundedSender<ServerCmd>>>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
}

pub struct FakeServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start(opts: FakeServerOptions) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            opts,
            sessions: AtomicUsize::new(0),
            auths: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            events_tx,
        });

        let accept_shared = shared.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_shared.clone()));
            }
        });

        Ok(Self {
            addr,
            shared,
            events_rx,
            task,
        })
    }

    /// Base URL to hand to the agent.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of namespace connects accepted so far.
    pub fn sessions(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    /// Auth payloads of every connect attempt, accepted or not.
    pub fn auths(&self) -> Vec<Value> {
        self.shared
            .auths
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    fn push(&self, cmd: ServerCmd) -> bool {
        let guard = match self.shared.current.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        guard.as_ref().is_some_and(|tx| tx.send(cmd).is_ok())
    }

    /// Emit an event to the connected client. False when nobody is connected.
    pub fn emit(&self, name: &str, data: Value) -> bool {
        self.push(ServerCmd::Event(name.to_owned(), data))
    }

    /// Socket.IO-level disconnect (`41`), socket left open.
    pub fn disconnect_client(&self) -> bool {
        self.push(ServerCmd::Disconnect)
    }

    /// Drop the TCP connection without a close handshake.
    pub fn kick(&self) -> bool {
        self.push(ServerCmd::Kick)
    }

    pub async fn next_event(&mut self, within: Duration) -> Option<ClientEvent> {
        tokio::time::timeout(within, self.events_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next event with the given name, skipping others.
    pub async fn next_event_named(&mut self, name: &str, within: Duration) -> Option<ClientEvent> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = self.next_event(left).await?;
            if event.name == name {
                return Some(event);
            }
        }
    }

    /// Everything emitted so far that has not been read.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            out.push(event);
        }
        out
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
        self.kick();
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    if shared.opts.mute {
        while let Some(Ok(_)) = ws.next().await {}
        return;
    }

    let n = shared.sessions.load(Ordering::SeqCst) + 1;
    let open = EnginePacket::Open(OpenInfo {
        sid: format!("eio-{n}"),
        upgrades: Vec::new(),
        ping_interval: shared.opts.ping_interval.as_millis() as u64,
        ping_timeout: shared.opts.ping_timeout.as_millis() as u64,
        max_payload: None,
    });
    if ws.send(Message::Text(open.encode().into())).await.is_err() {
        return;
    }

    let auth = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(EnginePacket::Message(body)) = EnginePacket::decode(text.as_str()) {
                    if let Ok(SocketPacket::Connect { data, .. }) = SocketPacket::decode(&body) {
                        break data.unwrap_or(Value::Null);
                    }
                }
            }
            Some(Ok(_)) => continue,
            _ => return,
        }
    };
    if let Ok(mut auths) = shared.auths.lock() {
        auths.push(auth.clone());
    }

    let accepted = match &shared.opts.api_key {
        Some(expected) => auth.get("api_key").and_then(Value::as_str) == Some(expected.as_str()),
        None => true,
    };
    if !accepted {
        let refusal = SocketPacket::ConnectError {
            namespace: "/".into(),
            data: Some(json!({ "message": "invalid api key" })),
        };
        let _ = ws.send(Message::Text(refusal.to_frame().into())).await;
        let _ = ws.close(None).await;
        return;
    }

    let session = shared.sessions.fetch_add(1, Ordering::SeqCst) + 1;
    let welcome = SocketPacket::Connect {
        namespace: "/".into(),
        data: Some(json!({ "sid": format!("sio-{session}") })),
    };
    if ws.send(Message::Text(welcome.to_frame().into())).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Ok(mut current) = shared.current.lock() {
        *current = Some(tx);
    }

    let mut ping = tokio::time::interval(shared.opts.ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(ServerCmd::Event(name, data)) => {
                    if ws.send(Message::Text(event_frame(&name, data).into())).await.is_err() {
                        return;
                    }
                }
                Some(ServerCmd::Disconnect) => {
                    let bye = SocketPacket::Disconnect { namespace: "/".into() }.to_frame();
                    let _ = ws.send(Message::Text(bye.into())).await;
                }
                Some(ServerCmd::Kick) | None => return,
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(EnginePacket::Message(body)) = EnginePacket::decode(text.as_str()) {
                        if let Ok(SocketPacket::Event { name, args, .. }) = SocketPacket::decode(&body) {
                            let data = args.into_iter().next().unwrap_or(Value::Null);
                            let _ = shared.events_tx.send(ClientEvent { name, data });
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            _ = ping.tick(), if shared.opts.send_pings => {
                if ws.send(Message::Text(EnginePacket::Ping(String::new()).encode().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}
