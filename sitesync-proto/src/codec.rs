//! Packet codec for the realtime channel.
//!
//! Two layers are stacked on every frame:
//!
//! - **Engine.IO v4** ([`EnginePacket`]): one leading type digit, then a
//!   payload. Over WebSocket each text frame carries one packet; over HTTP
//!   long-polling several packets are joined with [`RECORD_SEPARATOR`].
//! - **Socket.IO v5** ([`SocketPacket`]): carried inside Engine.IO `message`
//!   packets. Events are JSON arrays of the form `["name", payload]`.
//!
//! Only the default namespace and text packets are supported; binary
//! attachments are rejected with [`CodecError::Unsupported`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between packets in a long-polling payload.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Engine.IO protocol revision sent in the handshake query (`EIO=4`).
pub const ENGINE_PROTOCOL: u8 = 4;

/// Path the realtime endpoint is mounted on.
pub const SOCKET_PATH: &str = "/socket.io/";

/// Error type for packet encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input contained no packet at all.
    #[error("empty packet")]
    Empty,
    /// The leading type character is not a known packet type.
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    /// The packet is valid but uses a feature this codec does not speak.
    #[error("unsupported packet: {0}")]
    Unsupported(String),
    /// The packet structure is invalid.
    #[error("malformed packet: {0}")]
    Malformed(String),
    /// The JSON body failed to (de)serialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Server handshake carried in the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session id (used as `sid` query parameter when polling).
    pub sid: String,
    /// Transports the server allows upgrading to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between server pings, in milliseconds.
    pub ping_interval: u64,
    /// How long the server waits for a pong, in milliseconds.
    pub ping_timeout: u64,
    /// Largest payload the server accepts, in bytes.
    #[serde(default = "default_max_payload")]
    pub max_payload: u64,
}

const fn default_max_payload() -> u64 {
    1_000_000
}

impl Handshake {
    /// Time after which a silent server is considered gone.
    #[must_use]
    pub const fn liveness_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// One Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    /// `0`: session opened; sent once by the server.
    Open(Handshake),
    /// `1`: session closed.
    Close,
    /// `2`: heartbeat request (optionally carrying a probe string).
    Ping(String),
    /// `3`: heartbeat reply.
    Pong(String),
    /// `4`: a Socket.IO packet.
    Message(String),
    /// `5`: transport upgrade.
    Upgrade,
    /// `6`: no-op, used to release a pending poll.
    Noop,
}

impl EnginePacket {
    /// Encodes this packet into its text form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if the handshake cannot be serialized.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(match self {
            Self::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Self::Close => "1".to_string(),
            Self::Ping(probe) => format!("2{probe}"),
            Self::Pong(probe) => format!("3{probe}"),
            Self::Message(body) => format!("4{body}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        })
    }

    /// Decodes one packet from its text form.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for empty input, unknown types, binary
    /// packets, or an unparsable handshake.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(rest.to_string())),
            '3' => Ok(Self::Pong(rest.to_string())),
            '4' => Ok(Self::Message(rest.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            'b' => Err(CodecError::Unsupported("binary engine packet".into())),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

/// Joins several packets into one long-polling payload.
///
/// # Errors
///
/// Propagates any [`EnginePacket::encode`] failure.
pub fn encode_payload(packets: &[EnginePacket]) -> Result<String, CodecError> {
    let encoded = packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(encoded.join(&RECORD_SEPARATOR.to_string()))
}

/// Splits a long-polling payload into its packets.
///
/// # Errors
///
/// Fails on the first packet that cannot be decoded.
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>, CodecError> {
    if body.is_empty() {
        return Err(CodecError::Empty);
    }
    body.split(RECORD_SEPARATOR)
        .map(EnginePacket::decode)
        .collect()
}

/// One Socket.IO packet on the default namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketPacket {
    /// `0`: namespace connect. Sent bare by the client; the server answers
    /// with `{"sid": ...}`.
    Connect(Option<Value>),
    /// `1`: namespace disconnect.
    Disconnect,
    /// `2`: a named event with its payload.
    Event {
        /// Event name (first array element).
        name: String,
        /// Event payload (second array element, `null` when absent).
        data: Value,
        /// Acknowledgement id requested by the sender.
        ack: Option<u64>,
    },
    /// `3`: acknowledgement of an earlier event.
    Ack {
        /// Id of the acknowledged event.
        id: u64,
        /// Acknowledgement arguments.
        data: Vec<Value>,
    },
    /// `4`: the server refused the namespace connect.
    ConnectError(Value),
}

impl SocketPacket {
    /// Builds an event packet without acknowledgement.
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self::Event {
            name: name.into(),
            data,
            ack: None,
        }
    }

    /// Encodes this packet into its text form (without the Engine.IO prefix).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if a payload cannot be serialized.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(auth)) => format!("0{}", serde_json::to_string(auth)?),
            Self::Disconnect => "1".to_string(),
            Self::Event { name, data, ack } => {
                let mut items = vec![Value::String(name.clone())];
                if !data.is_null() {
                    items.push(data.clone());
                }
                let ack = ack.map(|id| id.to_string()).unwrap_or_default();
                format!("2{ack}{}", serde_json::to_string(&items)?)
            }
            Self::Ack { id, data } => format!("3{id}{}", serde_json::to_string(data)?),
            Self::ConnectError(reason) => format!("4{}", serde_json::to_string(reason)?),
        })
    }

    /// Decodes a packet from its text form (without the Engine.IO prefix).
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for binary packets, foreign namespaces,
    /// invalid JSON, or events without a string name.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(CodecError::Unsupported("binary socket packet".into()));
        }

        if rest.starts_with('/') {
            let (namespace, tail) = rest.split_once(',').unwrap_or((rest, ""));
            if namespace != "/" {
                return Err(CodecError::Unsupported(format!("namespace {namespace}")));
            }
            rest = tail;
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| CodecError::Malformed(format!("ack id: {e}")))?,
            )
        } else {
            None
        };
        rest = &rest[digits..];

        match kind {
            '0' if rest.is_empty() => Ok(Self::Connect(None)),
            '0' => Ok(Self::Connect(Some(serde_json::from_str(rest)?))),
            '1' => Ok(Self::Disconnect),
            '2' => decode_event(rest, ack),
            '3' => Ok(Self::Ack {
                id: ack.ok_or_else(|| CodecError::Malformed("ack without id".into()))?,
                data: serde_json::from_str(rest)?,
            }),
            '4' if rest.is_empty() => Ok(Self::ConnectError(Value::Null)),
            '4' => Ok(Self::ConnectError(serde_json::from_str(rest)?)),
            other => Err(CodecError::UnknownType(other)),
        }
    }

    /// Encodes this packet wrapped in an Engine.IO `message` packet.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_engine(&self) -> Result<String, CodecError> {
        EnginePacket::Message(self.encode()?).encode()
    }
}

fn decode_event(body: &str, ack: Option<u64>) -> Result<SocketPacket, CodecError> {
    let items: Vec<Value> = serde_json::from_str(body)?;
    let mut items = items.into_iter();
    let name = match items.next() {
        Some(Value::String(name)) => name,
        Some(other) => {
            return Err(CodecError::Malformed(format!(
                "event name must be a string, got {other}"
            )));
        }
        None => return Err(CodecError::Malformed("event without name".into())),
    };
    Ok(SocketPacket::Event {
        name,
        data: items.next().unwrap_or(Value::Null),
        ack,
    })
}
