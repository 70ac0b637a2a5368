//! Socket.IO v4 framing over Engine.IO v4 WebSocket text frames.
//!
//! Only what a listening client needs: handshake, heartbeat, namespace
//! connect/disconnect and plain (non-binary) event packets.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;

pub const ENGINE_PONG: &str = "3";
pub const DEFAULT_NAMESPACE: &str = "/";
/// Engine.IO v4 server defaults, used when the open packet omits them.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(25_000);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(20_000);

/// A named event and its first argument, not yet interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct PushFrame {
    pub name: String,
    pub payload: Value,
}

impl PushFrame {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Encodes as a Socket.IO event packet on the default namespace.
    pub fn encode(&self) -> String {
        format!(
            "42{}",
            Value::Array(vec![Value::String(self.name.clone()), self.payload.clone()])
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake; the client must answer with a namespace connect.
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connected { namespace: String },
    Disconnected { namespace: String },
    ConnectError { namespace: String, message: String },
    Event { namespace: String, frame: PushFrame },
    /// Acks, binary attachments and transport upgrade packets; a listening client ignores these.
    Ignored,
}

impl Packet {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let engine_type = chars
            .next()
            .ok_or_else(|| ProtocolError::MalformedPacket("empty frame".into()))?;
        let rest = chars.as_str();

        match engine_type {
            '0' => Ok(Packet::Open(Handshake::parse(rest))),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => parse_socket_packet(rest),
            '5' => Ok(Packet::Ignored),
            '6' => Ok(Packet::Noop),
            other => Err(ProtocolError::MalformedPacket(format!(
                "unknown engine packet type '{other}'"
            ))),
        }
    }
}

/// Heartbeat timing announced by the server in the open packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

impl Handshake {
    /// Missing or unreadable fields fall back to the defaults.
    fn parse(body: &str) -> Self {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            ping_interval: Option<u64>,
            ping_timeout: Option<u64>,
        }

        let raw = serde_json::from_str::<Raw>(body).ok();
        let defaults = Self::default();
        Self {
            ping_interval: raw
                .as_ref()
                .and_then(|r| r.ping_interval)
                .map_or(defaults.ping_interval, Duration::from_millis),
            ping_timeout: raw
                .and_then(|r| r.ping_timeout)
                .map_or(defaults.ping_timeout, Duration::from_millis),
        }
    }

    /// How long the connection may stay silent before it counts as dead.
    pub fn silence_limit(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}

/// Socket.IO namespace connect packet, wrapped in an Engine.IO message.
pub fn connect_packet(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        "40".to_string()
    } else {
        format!("40{namespace},")
    }
}

fn parse_socket_packet(body: &str) -> Result<Packet, ProtocolError> {
    let mut chars = body.chars();
    let socket_type = chars
        .next()
        .ok_or_else(|| ProtocolError::MalformedPacket("empty socket.io packet".into()))?;
    let (namespace, rest) = split_namespace(chars.as_str());
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    match socket_type {
        '0' => Ok(Packet::Connected { namespace }),
        '1' => Ok(Packet::Disconnected { namespace }),
        '2' => {
            let frame = parse_event(rest)?;
            Ok(Packet::Event { namespace, frame })
        }
        '4' => {
            let message = serde_json::from_str::<Value>(rest)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| rest.to_string());
            Ok(Packet::ConnectError { namespace, message })
        }
        '3' | '5' | '6' => Ok(Packet::Ignored),
        other => Err(ProtocolError::MalformedPacket(format!(
            "unknown socket.io packet type '{other}'"
        ))),
    }
}

fn split_namespace(rest: &str) -> (String, &str) {
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => (rest[..idx].to_string(), &rest[idx + 1..]),
            None => (rest.to_string(), ""),
        }
    } else {
        (DEFAULT_NAMESPACE.to_string(), rest)
    }
}

fn parse_event(body: &str) -> Result<PushFrame, ProtocolError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ProtocolError::MalformedPacket(format!("event body is not json: {e}")))?;
    let Value::Array(mut items) = value else {
        return Err(ProtocolError::MalformedPacket(
            "event body is not an array".into(),
        ));
    };
    if items.is_empty() {
        return Err(ProtocolError::MalformedPacket("event without a name".into()));
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        other => {
            return Err(ProtocolError::MalformedPacket(format!(
                "event name is not a string: {other}"
            )))
        }
    };
    let payload = if items.is_empty() {
        Value::Null
    } else {
        items.swap_remove(0)
    };
    Ok(PushFrame { name, payload })
}
