//! WebSocket framing of the realtime channel.
//!
//! Each text frame carries one Engine.IO packet. After the upgrade the server
//! sends the `open` handshake; a background reader task then answers pings,
//! unwraps `message` packets into [`SocketPacket`]s, and watches for a silent
//! server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sitesync_proto::codec::{EnginePacket, Handshake, SocketPacket};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{Connector, Endpoint, Transport, TransportError, TransportType};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for the upgrade plus `open` handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An open Engine.IO session over WebSocket.
pub struct WebSocketTransport {
    /// Handshake the server opened the session with.
    handshake: Handshake,
    /// Write half, shared with the reader task for pongs.
    ws_sender: Arc<Mutex<WsSender>>,
    /// Packets decoded by the reader task.
    incoming: Mutex<mpsc::Receiver<SocketPacket>>,
    /// Cleared when the reader task exits or a send fails.
    connected: Arc<AtomicBool>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl WebSocketTransport {
    /// Upgrade to WebSocket at `url` and wait for the Engine.IO handshake.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the upgrade or handshake exceeds `connect_timeout`.
    /// - [`TransportError::Unreachable`] if nothing listens at `url`.
    /// - [`TransportError::Protocol`] if the first frame is not an `open` packet.
    pub async fn connect(url: &Url, connect_timeout: Duration) -> Result<Self, TransportError> {
        let (ws_sender, ws_reader, handshake) =
            tokio::time::timeout(connect_timeout, open_session(url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %url, "websocket connect timed out");
                    TransportError::Timeout
                })??;

        tracing::info!(
            sid = %handshake.sid,
            ping_interval = handshake.ping_interval,
            "websocket session open"
        );

        let (tx, rx) = mpsc::channel(256);
        let connected = Arc::new(AtomicBool::new(true));
        let ws_sender = Arc::new(Mutex::new(ws_sender));
        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&ws_sender),
            tx,
            Arc::clone(&connected),
            handshake.liveness_deadline(),
        ));

        Ok(Self {
            handshake,
            ws_sender,
            incoming: Mutex::new(rx),
            connected,
            reader_handle,
        })
    }

    /// Handshake the server opened this session with.
    #[must_use]
    pub const fn handshake(&self) -> &Handshake {
        &self.handshake
    }
}

async fn open_session(url: &Url) -> Result<(WsSender, WsReader, Handshake), TransportError> {
    let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
        tracing::warn!(url = %url, err = %e, "websocket connect failed");
        map_ws_connect_error(e)
    })?;
    let (ws_sender, mut ws_reader) = ws_stream.split();

    let handshake = match ws_reader.next().await {
        Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text)? {
            EnginePacket::Open(handshake) => handshake,
            other => {
                return Err(TransportError::Protocol(format!(
                    "expected open packet, got {other:?}"
                )));
            }
        },
        Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionClosed),
        Some(Ok(other)) => {
            return Err(TransportError::Protocol(format!(
                "unexpected frame during handshake: {other:?}"
            )));
        }
        Some(Err(e)) => {
            return Err(TransportError::Io(std::io::Error::other(format!(
                "websocket error during handshake: {e}"
            ))));
        }
    };
    Ok((ws_sender, ws_reader, handshake))
}

impl Transport for WebSocketTransport {
    async fn send(&self, packet: &SocketPacket) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        let text = packet.to_engine()?;
        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::Text(text.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "websocket send failed");
            self.connected.store(false, Ordering::Relaxed);
            TransportError::ConnectionClosed
        })
    }

    async fn recv(&self) -> Result<SocketPacket, TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    async fn close(&self) {
        if !self.connected.swap(false, Ordering::Relaxed) {
            return;
        }
        let mut sender = self.ws_sender.lock().await;
        if let Ok(text) = SocketPacket::Disconnect.to_engine() {
            let _ = sender.send(Message::Text(text.into())).await;
        }
        let _ = sender.close().await;
        self.reader_handle.abort();
        tracing::debug!(sid = %self.handshake.sid, "websocket session closed");
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Background task that reads frames until the session ends.
///
/// Pings are answered with pongs. Malformed frames are logged and skipped.
/// If no frame arrives within `deadline` the server is presumed gone.
async fn reader_loop(
    mut ws_reader: WsReader,
    ws_sender: Arc<Mutex<WsSender>>,
    tx: mpsc::Sender<SocketPacket>,
    connected: Arc<AtomicBool>,
    deadline: Duration,
) {
    loop {
        let frame = match tokio::time::timeout(deadline, ws_reader.next()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("websocket stream ended");
                break;
            }
            Err(_) => {
                tracing::warn!(?deadline, "no heartbeat from server, dropping session");
                break;
            }
        };

        match frame {
            Ok(Message::Text(text)) => match EnginePacket::decode(&text) {
                Ok(EnginePacket::Ping(probe)) => {
                    let Ok(pong) = EnginePacket::Pong(probe).encode() else {
                        continue;
                    };
                    let mut sender = ws_sender.lock().await;
                    if let Err(e) = sender.send(Message::Text(pong.into())).await {
                        tracing::warn!(err = %e, "failed to answer ping");
                        break;
                    }
                }
                Ok(EnginePacket::Message(body)) => match SocketPacket::decode(&body) {
                    Ok(packet) => {
                        if tx.send(packet).await.is_err() {
                            // Transport dropped.
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(err = %e, "malformed socket packet, skipping"),
                },
                Ok(EnginePacket::Close) => {
                    tracing::info!("server closed the engine session");
                    break;
                }
                Ok(other) => tracing::debug!(?other, "ignoring engine packet"),
                Err(e) => tracing::warn!(err = %e, "malformed engine packet, skipping"),
            },
            Ok(Message::Close(_)) => {
                tracing::info!("websocket closed by server");
                break;
            }
            Ok(Message::Binary(_)) => tracing::debug!("ignoring binary frame"),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, "websocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!("websocket reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) {
                TransportError::Unreachable(io_err.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Protocol(format!(
            "websocket upgrade refused: status {}",
            response.status()
        )),
        WsError::Url(e) => TransportError::InvalidUrl(e.to_string()),
        other => TransportError::Io(std::io::Error::other(format!(
            "websocket connection error: {other}"
        ))),
    }
}

/// Opens [`WebSocketTransport`] links.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
    pub connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Connector for WebSocketConnector {
    type Link = WebSocketTransport;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Link, TransportError> {
        let url = endpoint.url_for(TransportType::WebSocket)?;
        WebSocketTransport::connect(&url, self.connect_timeout).await
    }
}
