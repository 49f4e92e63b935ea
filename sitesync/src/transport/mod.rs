//! Transport layer for the realtime channel.
//!
//! A [`Transport`] carries Socket.IO packets over one Engine.IO session and
//! hides the Engine.IO housekeeping (handshake, heartbeat, framing).
//! Implementations:
//! - [`websocket::WebSocketTransport`]: persistent WebSocket framing
//! - [`polling::PollingTransport`]: HTTP long-polling framing
//! - [`loopback::LoopbackTransport`]: in-process channels for testing
//!
//! A [`Connector`] opens links; [`fallback::FallbackConnector`] tries
//! WebSocket first and falls back to polling.

pub mod fallback;
pub mod loopback;
pub mod polling;
pub mod websocket;

use std::fmt;
use std::future::Future;

use sitesync_proto::codec::{CodecError, ENGINE_PROTOCOL, SOCKET_PATH, SocketPacket};
use url::Url;

use crate::identity::Identity;

/// Connector used by default: WebSocket with polling fallback.
pub type DefaultConnector =
    fallback::FallbackConnector<websocket::WebSocketConnector, polling::PollingConnector>;

/// Describes which framing a link uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Persistent WebSocket framing.
    WebSocket,
    /// HTTP long-polling framing.
    Polling,
    /// In-process loopback for testing.
    Loopback,
}

impl TransportType {
    /// Value of the `transport` query parameter.
    #[must_use]
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Polling | Self::Loopback => "polling",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "WebSocket"),
            Self::Polling => write!(f, "Polling"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("{0} is unreachable")]
    Unreachable(String),

    /// The server spoke something other than the expected protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server URL is not usable.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    /// An HTTP request of the polling framing failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async transport carrying Socket.IO packets.
///
/// Engine.IO `ping`s are answered inside the transport; a server that stays
/// silent beyond `pingInterval + pingTimeout` is treated as gone and
/// [`Transport::recv`] returns [`TransportError::ConnectionClosed`].
pub trait Transport: Send + Sync {
    /// Send one packet.
    ///
    /// Returns once the packet has been handed to the underlying socket or
    /// HTTP request. Nothing is buffered across reconnects.
    fn send(
        &self,
        packet: &SocketPacket,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next packet, in arrival order.
    fn recv(&self) -> impl Future<Output = Result<SocketPacket, TransportError>> + Send;

    /// Whether the session is still open.
    fn is_connected(&self) -> bool;

    /// Return the framing of this link.
    fn transport_type(&self) -> TransportType;

    /// Close the session. Safe to call more than once.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Opens transport links to an [`Endpoint`].
pub trait Connector: Send + Sync + 'static {
    /// Link type produced by this connector.
    type Link: Transport + 'static;

    /// Open a new link.
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// Realtime server address plus the identity passed in the handshake query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
    user_id: String,
    username: String,
}

impl Endpoint {
    /// Build the endpoint for `identity` on the server at `base`.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidUrl`] if `base` does not parse or is not an
    /// `http`, `https`, `ws` or `wss` URL.
    pub fn new(base: &str, identity: &Identity) -> Result<Self, TransportError> {
        let base =
            Url::parse(base).map_err(|e| TransportError::InvalidUrl(format!("{base}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {}",
                base.scheme()
            )));
        }
        Ok(Self {
            base,
            user_id: identity.id.to_string(),
            username: identity.name.clone(),
        })
    }

    /// Handshake URL for the given framing.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidUrl`] if the scheme cannot be switched.
    pub fn url_for(&self, framing: TransportType) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        let scheme = match (framing, url.scheme()) {
            (TransportType::WebSocket, "http" | "ws") => "ws",
            (TransportType::WebSocket, _) => "wss",
            (_, "https" | "wss") => "https",
            _ => "http",
        };
        url.set_scheme(scheme)
            .map_err(|()| TransportError::InvalidUrl(format!("cannot switch to {scheme}")))?;
        let path = format!("{}{SOCKET_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", &ENGINE_PROTOCOL.to_string())
            .append_pair("transport", framing.query_value())
            .append_pair("userId", &self.user_id)
            .append_pair("username", &self.username);
        Ok(url)
    }

    /// Polling URL bound to an open Engine.IO session.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::url_for`].
    pub fn session_url(&self, sid: &str) -> Result<Url, TransportError> {
        let mut url = self.url_for(TransportType::Polling)?;
        url.query_pairs_mut().append_pair("sid", sid);
        Ok(url)
    }

    /// Server base URL (for log fields).
    #[must_use]
    pub fn base(&self) -> &str {
        self.base.as_str()
    }
}
