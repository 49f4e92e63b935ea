//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to stand in for a server
//! connection. [`LoopbackTransport::create_pair`] returns two connected
//! endpoints; [`LoopbackConnector`] hands out client halves one connect at a
//! time so tests can play the server side.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sitesync_proto::codec::SocketPacket;
use tokio::sync::{Mutex, mpsc};

use super::{Connector, Endpoint, Transport, TransportError, TransportType};

/// In-process transport backed by unbounded channels.
pub struct LoopbackTransport {
    /// Sender toward the remote half; taken on close.
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<SocketPacket>>>,
    rx: Mutex<mpsc::UnboundedReceiver<SocketPacket>>,
}

impl LoopbackTransport {
    /// Create a pair of connected loopback transports.
    ///
    /// Packets sent by one end are received by the other.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use sitesync::transport::loopback::LoopbackTransport;
    /// use sitesync::transport::Transport;
    /// use sitesync_proto::codec::SocketPacket;
    ///
    /// # async fn example() {
    /// let (client, server) = LoopbackTransport::create_pair();
    /// client.send(&SocketPacket::Connect(None)).await.unwrap();
    /// assert_eq!(server.recv().await.unwrap(), SocketPacket::Connect(None));
    /// # }
    /// ```
    #[must_use]
    pub fn create_pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self {
            tx: parking_lot::Mutex::new(Some(tx_b)),
            rx: Mutex::new(rx_a),
        };
        let b = Self {
            tx: parking_lot::Mutex::new(Some(tx_a)),
            rx: Mutex::new(rx_b),
        };
        (a, b)
    }
}

impl Transport for LoopbackTransport {
    async fn send(&self, packet: &SocketPacket) -> Result<(), TransportError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(packet.clone())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<SocketPacket, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }

    async fn close(&self) {
        self.tx.lock().take();
        self.rx.lock().await.close();
    }
}

/// Connector that yields loopback links queued by [`LoopbackConnector::accept_next`].
///
/// A connect attempt with nothing queued fails with
/// [`TransportError::Unreachable`], which lets tests script outages.
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    pending: Arc<parking_lot::Mutex<VecDeque<LoopbackTransport>>>,
    attempts: Arc<AtomicUsize>,
}

impl LoopbackConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a link for the next connect attempt and return its server half.
    #[must_use]
    pub fn accept_next(&self) -> LoopbackTransport {
        let (client, server) = LoopbackTransport::create_pair();
        self.pending.lock().push_back(client);
        server
    }

    /// Number of connect attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for LoopbackConnector {
    type Link = LoopbackTransport;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.pending
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::Unreachable(endpoint.base().to_string()))
    }
}
