//! HTTP long-polling framing of the realtime channel.
//!
//! The handshake `GET` returns the Engine.IO `open` packet; afterwards a
//! background task keeps one `GET` outstanding (the server holds it until it
//! has packets or a ping to deliver) and outbound packets are `POST`ed.
//! At most one `POST` is in flight per session; emits and pongs queue on
//! the same [`Uplink`]. Payloads join packets with the record separator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sitesync_proto::codec::{self, EnginePacket, Handshake, SocketPacket};
use tokio::sync::{Mutex, mpsc};
use url::Url;

use super::{Connector, Endpoint, Transport, TransportError, TransportType};

/// Default timeout for the handshake request and for each `POST`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// Sending half of a polling session, shared by the transport and its
/// poll task.
struct Uplink {
    http: reqwest::Client,
    /// Session URL (`...&sid=`) used for every request after the handshake.
    session_url: Url,
    request_timeout: Duration,
    /// Held across each `POST`.
    in_flight: Mutex<()>,
}

impl Uplink {
    async fn post(&self, packets: &[EnginePacket]) -> Result<(), TransportError> {
        let body = codec::encode_payload(packets)?;
        let _guard = self.in_flight.lock().await;
        self.http
            .post(self.session_url.clone())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .timeout(self.request_timeout)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// An open Engine.IO session over HTTP long-polling.
pub struct PollingTransport {
    handshake: Handshake,
    uplink: Arc<Uplink>,
    incoming: Mutex<mpsc::Receiver<SocketPacket>>,
    connected: Arc<AtomicBool>,
    poll_handle: tokio::task::JoinHandle<()>,
}

impl PollingTransport {
    /// Perform the polling handshake against `endpoint`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake exceeds `request_timeout`.
    /// - [`TransportError::Http`] if the request fails or the server answers
    ///   with an error status.
    /// - [`TransportError::Protocol`] if the reply does not start with `open`.
    pub async fn connect(
        endpoint: &Endpoint,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().build()?;
        let url = endpoint.url_for(TransportType::Polling)?;

        let body = tokio::time::timeout(request_timeout, fetch(&http, url.clone()))
            .await
            .map_err(|_| {
                tracing::warn!(url = %url, "polling handshake timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = %url, err = %e, "polling handshake failed");
                e
            })?;

        let mut packets = codec::decode_payload(&body)?.into_iter();
        let handshake = match packets.next() {
            Some(EnginePacket::Open(handshake)) => handshake,
            other => {
                return Err(TransportError::Protocol(format!(
                    "expected open packet, got {other:?}"
                )));
            }
        };
        let backlog: Vec<EnginePacket> = packets.collect();
        let session_url = endpoint.session_url(&handshake.sid)?;

        tracing::info!(
            sid = %handshake.sid,
            ping_interval = handshake.ping_interval,
            "polling session open"
        );

        let (tx, rx) = mpsc::channel(256);
        let connected = Arc::new(AtomicBool::new(true));
        let uplink = Arc::new(Uplink {
            http,
            session_url,
            request_timeout,
            in_flight: Mutex::new(()),
        });
        let poll_handle = tokio::spawn(poll_loop(PollTask {
            uplink: Arc::clone(&uplink),
            deadline: handshake.liveness_deadline(),
            tx,
            connected: Arc::clone(&connected),
            backlog,
        }));

        Ok(Self {
            handshake,
            uplink,
            incoming: Mutex::new(rx),
            connected,
            poll_handle,
        })
    }

    /// Handshake the server opened this session with.
    #[must_use]
    pub const fn handshake(&self) -> &Handshake {
        &self.handshake
    }
}

impl Transport for PollingTransport {
    async fn send(&self, packet: &SocketPacket) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        let packets = [EnginePacket::Message(packet.encode()?)];
        self.uplink.post(&packets).await.inspect_err(|e| {
            tracing::warn!(err = %e, "polling send failed");
            self.connected.store(false, Ordering::Relaxed);
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
        TransportType::Polling
    }

    async fn close(&self) {
        if !self.connected.swap(false, Ordering::Relaxed) {
            return;
        }
        let goodbye = [
            EnginePacket::Message("1".to_string()),
            EnginePacket::Close,
        ];
        if let Err(e) = self.uplink.post(&goodbye).await {
            tracing::debug!(err = %e, "close request failed");
        }
        self.poll_handle.abort();
        tracing::debug!(sid = %self.handshake.sid, "polling session closed");
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.poll_handle.abort();
    }
}

async fn fetch(http: &reqwest::Client, url: Url) -> Result<String, TransportError> {
    let response = http.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

struct PollTask {
    uplink: Arc<Uplink>,
    /// Upper bound for one outstanding `GET`.
    deadline: Duration,
    tx: mpsc::Sender<SocketPacket>,
    connected: Arc<AtomicBool>,
    /// Packets that arrived together with the handshake.
    backlog: Vec<EnginePacket>,
}

impl PollTask {
    /// Handle one packet. Returns `false` when the session is over.
    async fn dispatch(&self, packet: EnginePacket) -> bool {
        match packet {
            EnginePacket::Ping(probe) => {
                let pong = [EnginePacket::Pong(probe)];
                if let Err(e) = self.uplink.post(&pong).await {
                    tracing::warn!(err = %e, "failed to answer ping");
                    return false;
                }
                true
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                Ok(packet) => self.tx.send(packet).await.is_ok(),
                Err(e) => {
                    tracing::warn!(err = %e, "malformed socket packet, skipping");
                    true
                }
            },
            EnginePacket::Close => {
                tracing::info!("server closed the engine session");
                false
            }
            other => {
                tracing::debug!(?other, "ignoring engine packet");
                true
            }
        }
    }
}

/// Background task keeping one poll outstanding until the session ends.
async fn poll_loop(mut task: PollTask) {
    let backlog = std::mem::take(&mut task.backlog);
    let mut open = true;
    for packet in backlog {
        if !task.dispatch(packet).await {
            open = false;
            break;
        }
    }

    while open {
        let request = task
            .uplink
            .http
            .get(task.uplink.session_url.clone())
            .timeout(task.deadline)
            .send();
        let body = match request.await.and_then(reqwest::Response::error_for_status) {
            Ok(response) => match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(err = %e, "failed to read poll response");
                    break;
                }
            },
            Err(e) if e.is_timeout() => {
                tracing::warn!(
                    deadline = ?task.deadline,
                    "no heartbeat from server, dropping session"
                );
                break;
            }
            Err(e) => {
                tracing::warn!(err = %e, "poll request failed");
                break;
            }
        };

        let packets = match codec::decode_payload(&body) {
            Ok(packets) => packets,
            Err(e) => {
                tracing::warn!(err = %e, "malformed poll payload, skipping");
                continue;
            }
        };
        for packet in packets {
            if !task.dispatch(packet).await {
                open = false;
                break;
            }
        }
    }

    task.connected.store(false, Ordering::Relaxed);
    tracing::debug!("poll task exiting");
}

/// Opens [`PollingTransport`] links.
#[derive(Debug, Clone, Copy)]
pub struct PollingConnector {
    pub request_timeout: Duration,
}

impl Default for PollingConnector {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Connector for PollingConnector {
    type Link = PollingTransport;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Link, TransportError> {
        PollingTransport::connect(endpoint, self.request_timeout).await
    }
}
