//! Connection manager.
//!
//! A [`SyncClient`] owns at most one live realtime connection, bound to the
//! identity passed to [`SyncClient::connect`]. A supervisor task opens the
//! link, joins the default namespace, replays the channel subscriptions,
//! then pumps inbound packets into the [`SyncStore`] and outbound events onto
//! the wire until the link drops. Lost links are retried with
//! [`backoff::Backoff`].
//!
//! The `connected` signal turns `true` on the namespace connect ack and
//! `false` on transport loss, server close, or [`SyncClient::disconnect`].

pub mod actions;
pub mod backoff;
mod session;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sitesync_proto::event::OutboundEvent;
use tokio::sync::{mpsc, watch};

pub use actions::ActionError;
pub use backoff::ReconnectConfig;

use crate::clock::{Clock, SystemClock};
use crate::identity::Identity;
use crate::store::{StoreLimits, SyncStore};
use crate::subscription::{self, DesiredRooms};
use crate::transport::fallback::FallbackConnector;
use crate::transport::polling::PollingConnector;
use crate::transport::websocket::WebSocketConnector;
use crate::transport::{Connector, DefaultConnector, TransportType};

/// Default realtime connect timeout (framing handshake and namespace ack).
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings of a [`SyncClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Realtime server base URL, e.g. `http://localhost:5001`.
    pub server_url: String,
    /// Timeout for each framing handshake and for the namespace ack.
    pub socket_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub limits: StoreLimits,
}

impl ClientOptions {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            limits: StoreLimits::default(),
        }
    }
}

/// Connection-scoped state, guarded by one lock so activation, the
/// subscription replay and room changes never interleave.
#[derive(Default)]
struct LinkState {
    identity: Option<Identity>,
    /// Present exactly while connected.
    outbound: Option<mpsc::UnboundedSender<OutboundEvent>>,
    transport: Option<TransportType>,
    rooms: DesiredRooms,
}

struct Inner<C> {
    connector: C,
    options: ClientOptions,
    store: SyncStore,
    clock: Arc<dyn Clock>,
    link: Mutex<LinkState>,
    connected: watch::Sender<bool>,
}

impl<C> Inner<C> {
    /// Open the outbound queue for a fresh connection and queue the
    /// subscription replay ahead of anything else.
    fn activate(
        &self,
        identity: &Identity,
        transport: TransportType,
    ) -> mpsc::UnboundedReceiver<OutboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut link = self.link.lock();
        for event in subscription::replay(identity, &link.rooms) {
            // The receiver is alive; it was created above.
            let _ = tx.send(event);
        }
        link.outbound = Some(tx);
        link.transport = Some(transport);
        self.set_connected(true);
        rx
    }

    /// Drop the outbound queue; anything not yet written is discarded.
    fn deactivate(&self) {
        let mut link = self.link.lock();
        link.outbound = None;
        link.transport = None;
        self.set_connected(false);
    }

    fn set_connected(&self, value: bool) {
        self.connected.send_if_modified(|connected| {
            let changed = *connected != value;
            *connected = value;
            changed
        });
    }
}

struct Supervisor {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Explicitly owned handle to the realtime session.
///
/// Dropping the handle stops the supervisor.
pub struct SyncClient<C: Connector = DefaultConnector> {
    inner: Arc<Inner<C>>,
    supervisor: Mutex<Option<Supervisor>>,
    /// Serializes `connect` and `disconnect`.
    lifecycle: tokio::sync::Mutex<()>,
}

impl SyncClient<DefaultConnector> {
    /// Client using WebSocket with polling fallback.
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        let connector = FallbackConnector::new(
            WebSocketConnector {
                connect_timeout: options.socket_timeout,
            },
            PollingConnector {
                request_timeout: options.socket_timeout,
            },
        );
        Self::with_connector(connector, options)
    }
}

impl<C: Connector> SyncClient<C> {
    pub fn with_connector(connector: C, options: ClientOptions) -> Self {
        Self::with_clock(connector, options, Arc::new(SystemClock))
    }

    /// Client whose store and badge stamps use `clock`.
    pub fn with_clock(connector: C, options: ClientOptions, clock: Arc<dyn Clock>) -> Self {
        let store = SyncStore::with_clock(options.limits, Arc::clone(&clock));
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                connector,
                options,
                store,
                clock,
                link: Mutex::new(LinkState::default()),
                connected,
            }),
            supervisor: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Start a session for `identity`, replacing any previous one.
    ///
    /// Returns immediately; watch [`SyncClient::connected`] for the outcome.
    /// Connection failures are logged and retried, never returned.
    pub async fn connect(&self, identity: Identity) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop().await;
        tracing::info!(
            user_id = %identity.id,
            server = %self.inner.options.server_url,
            "starting realtime session"
        );
        self.inner.link.lock().identity = Some(identity.clone());
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(session::supervise(
            Arc::clone(&self.inner),
            identity,
            stop_rx,
        ));
        *self.supervisor.lock() = Some(Supervisor { stop, handle });
    }

    /// Tear the session down. Safe to call when not connected.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop().await;
    }

    async fn stop(&self) {
        let supervisor = self.supervisor.lock().take();
        if let Some(Supervisor { stop, handle }) = supervisor {
            let _ = stop.send(true);
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(err = %e, "realtime supervisor panicked");
                }
            }
            tracing::info!("realtime session stopped");
        }
        self.inner.deactivate();
        self.inner.link.lock().identity = None;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Watch the `connected` signal.
    #[must_use]
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Wait until `connected` equals `state`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, state: bool, timeout: Duration) -> bool {
        let mut rx = self.inner.connected.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|connected| *connected == state))
            .await
            .is_ok_and(|result| result.is_ok())
    }

    /// Whether a supervisor is still running (connected or retrying).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .is_some_and(|supervisor| !supervisor.handle.is_finished())
    }

    /// Framing of the live connection, if any.
    #[must_use]
    pub fn transport_type(&self) -> Option<TransportType> {
        self.inner.link.lock().transport
    }

    /// Identity of the current session.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.inner.link.lock().identity.clone()
    }

    /// Rooms that will be joined on every connect.
    #[must_use]
    pub fn desired_rooms(&self) -> Vec<String> {
        self.inner
            .link
            .lock()
            .rooms
            .iter()
            .map(str::to_string)
            .collect()
    }

    /// Current time on the client's clock.
    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.clock.now()
    }

    /// The projections fed by this client.
    #[must_use]
    pub fn store(&self) -> &SyncStore {
        &self.inner.store
    }
}

impl<C: Connector> Drop for SyncClient<C> {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.handle.abort();
        }
        self.inner.deactivate();
    }
}
