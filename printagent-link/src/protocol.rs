//! Engine.IO v4 / Socket.IO v5 text framing, WebSocket transport only.
//!
//! An Engine.IO packet is a one-digit type followed by its payload. A
//! Socket.IO packet rides inside an Engine.IO `message` (type `4`) and reads
//! `<type>[<attachments>-][<namespace>,][<ack id>][<json>]`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::LinkError;

pub const DEFAULT_NAMESPACE: &str = "/";

/// Handshake data carried by the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenInfo {
    /// How long silence may last before the server is considered gone.
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, LinkError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| LinkError::Protocol("empty engine.io packet".into()))?;
        let body = chars.as_str();
        Ok(match kind {
            '0' => {
                let info = serde_json::from_str(body)
                    .map_err(|e| LinkError::Protocol(format!("bad open packet: {e}")))?;
                EnginePacket::Open(info)
            }
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(body.to_owned()),
            '3' => EnginePacket::Pong(body.to_owned()),
            '4' => EnginePacket::Message(body.to_owned()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => {
                return Err(LinkError::Protocol(format!(
                    "unknown engine.io packet type {other:?}"
                )))
            }
        })
    }

    pub fn encode(&self) -> String {
        match self {
            // The server never expects an open from the client; encoded for fakes in tests.
            EnginePacket::Open(info) => format!(
                "0{{\"sid\":{},\"upgrades\":[],\"pingInterval\":{},\"pingTimeout\":{}}}",
                Value::String(info.sid.clone()),
                info.ping_interval,
                info.ping_timeout
            ),
            EnginePacket::Close => "1".to_owned(),
            EnginePacket::Ping(data) => format!("2{data}"),
            EnginePacket::Pong(data) => format!("3{data}"),
            EnginePacket::Message(data) => format!("4{data}"),
            EnginePacket::Upgrade => "5".to_owned(),
            EnginePacket::Noop => "6".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    pub fn decode(text: &str) -> Result<Self, LinkError> {
        let bytes = text.as_bytes();
        let kind = *bytes
            .first()
            .ok_or_else(|| LinkError::Protocol("empty socket.io packet".into()))?;
        let mut rest = &text[1..];

        if matches!(kind, b'5' | b'6') {
            return Err(LinkError::Protocol(
                "binary socket.io packets are not supported".into(),
            ));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_owned()
                }
                None => {
                    let ns = rest.to_owned();
                    rest = "";
                    ns
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_owned()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| LinkError::Protocol(format!("bad ack id: {e}")))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(rest)
                    .map_err(|e| LinkError::Protocol(format!("bad packet data: {e}")))?,
            )
        };

        Ok(match kind {
            b'0' => SocketPacket::Connect { namespace, data },
            b'1' => SocketPacket::Disconnect { namespace },
            b'2' => {
                let mut args = match data {
                    Some(Value::Array(args)) => args,
                    _ => return Err(LinkError::Protocol("event without argument array".into())),
                };
                if args.is_empty() {
                    return Err(LinkError::Protocol("event without a name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(LinkError::Protocol(format!("event name is not a string: {other}")))
                    }
                };
                SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args,
                }
            }
            b'3' => {
                let id = id.ok_or_else(|| LinkError::Protocol("ack without id".into()))?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    _ => Vec::new(),
                };
                SocketPacket::Ack {
                    namespace,
                    id,
                    args,
                }
            }
            b'4' => SocketPacket::ConnectError { namespace, data },
            other => {
                return Err(LinkError::Protocol(format!(
                    "unknown socket.io packet type {:?}",
                    other as char
                )))
            }
        })
    }

    pub fn encode(&self) -> String {
        fn ns_prefix(namespace: &str) -> String {
            if namespace == DEFAULT_NAMESPACE {
                String::new()
            } else {
                format!("{namespace},")
            }
        }

        match self {
            SocketPacket::Connect { namespace, data } => format!(
                "0{}{}",
                ns_prefix(namespace),
                data.as_ref().map(Value::to_string).unwrap_or_default()
            ),
            SocketPacket::Disconnect { namespace } => format!("1{}", ns_prefix(namespace)),
            SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            } => {
                let mut arr = Vec::with_capacity(args.len() + 1);
                arr.push(Value::String(name.clone()));
                arr.extend(args.iter().cloned());
                format!(
                    "2{}{}{}",
                    ns_prefix(namespace),
                    id.map(|i| i.to_string()).unwrap_or_default(),
                    Value::Array(arr)
                )
            }
            SocketPacket::Ack {
                namespace,
                id,
                args,
            } => format!("3{}{}{}", ns_prefix(namespace), id, Value::Array(args.clone())),
            SocketPacket::ConnectError { namespace, data } => format!(
                "4{}{}",
                ns_prefix(namespace),
                data.as_ref().map(Value::to_string).unwrap_or_default()
            ),
        }
    }

    /// Wrap in an Engine.IO message frame.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

/// Frame that opens the default namespace with the agent's credential.
pub fn connect_frame(api_key: &str) -> String {
    SocketPacket::Connect {
        namespace: DEFAULT_NAMESPACE.to_owned(),
        data: Some(serde_json::json!({ "api_key": api_key })),
    }
    .to_frame()
}

/// Frame carrying one event with a single argument.
pub fn event_frame(name: &str, data: Value) -> String {
    SocketPacket::Event {
        namespace: DEFAULT_NAMESPACE.to_owned(),
        id: None,
        name: name.to_owned(),
        args: vec![data],
    }
    .to_frame()
}

/// WebSocket endpoint for a server base URL.
///
/// `http`/`https` map to `ws`/`wss`; the Socket.IO path is appended to any
/// existing path, and the Engine.IO query selects protocol 4 over WebSocket.
pub fn endpoint_url(server_url: &str) -> Result<Url, LinkError> {
    let invalid = |reason: String| LinkError::InvalidUrl {
        url: server_url.to_owned(),
        reason,
    };
    let mut url = Url::parse(server_url.trim()).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("cannot change scheme".into()))?;

    let base = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{base}/socket.io/"));
    url.set_query(Some("EIO=4&transport=websocket"));
    url.set_fragment(None);
    Ok(url)
}
