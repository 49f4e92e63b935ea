//! Hub core: shared state, Engine.IO sessions, heartbeats and the router.
//!
//! Every client gets one [`Socket`] keyed by its Engine.IO session id. The
//! socket owns an outbound packet queue: a WebSocket session drains it from
//! a writer task, a long-polling session drains it whenever the client has
//! a `GET` outstanding. Inbound packets from either framing end up in
//! [`HubState::handle_engine_packet`], and Socket.IO events are routed by
//! [`crate::events`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use sitesync_proto::codec::{self, EnginePacket, Handshake, SOCKET_PATH, SocketPacket};
use tokio::sync::{Mutex, Notify, RwLock, mpsc};

use crate::store::{
    ChatHistory, DEFAULT_NOTIFICATION_CAPACITY, DEFAULT_ROOM_CAPACITY, NotificationQueue,
};
use crate::{api, events};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(20);

/// Messages replayed to a socket joining a room.
pub const DEFAULT_HISTORY_REPLAY: usize = 50;

const MAX_PAYLOAD: u64 = 1_000_000;
const POLL_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Tunables of a hub instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// Accept WebSocket sessions. When off, only long-polling is served.
    pub websocket: bool,
    pub history_replay: usize,
    pub room_capacity: usize,
    pub notification_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            websocket: true,
            history_replay: DEFAULT_HISTORY_REPLAY,
            room_capacity: DEFAULT_ROOM_CAPACITY,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

/// Engine.IO framing a socket was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    WebSocket,
    Polling,
}

/// A user announced through `register_user`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredUser {
    pub username: String,
    pub user_id: Value,
    pub connected_at: String,
}

/// One Engine.IO session.
pub struct Socket {
    pub sid: String,
    pub framing: Framing,
    tx: mpsc::UnboundedSender<EnginePacket>,
    /// Outbound queue of a polling session, drained by `GET`s.
    poll: Option<Mutex<mpsc::UnboundedReceiver<EnginePacket>>>,
    /// Held while a polling `POST` is being handled.
    post: Mutex<()>,
    pong: Notify,
    closed: AtomicBool,
    namespace: AtomicBool,
    user: parking_lot::Mutex<Option<RegisteredUser>>,
    rooms: parking_lot::Mutex<HashSet<String>>,
}

impl Socket {
    fn new(
        sid: String,
        framing: Framing,
    ) -> (Self, Option<mpsc::UnboundedReceiver<EnginePacket>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (poll, rx) = match framing {
            Framing::Polling => (Some(Mutex::new(rx)), None),
            Framing::WebSocket => (None, Some(rx)),
        };
        let socket = Self {
            sid,
            framing,
            tx,
            poll,
            post: Mutex::new(()),
            pong: Notify::new(),
            closed: AtomicBool::new(false),
            namespace: AtomicBool::new(false),
            user: parking_lot::Mutex::new(None),
            rooms: parking_lot::Mutex::new(HashSet::new()),
        };
        (socket, rx)
    }

    /// Queue an engine packet. `false` once the session is gone.
    pub fn send(&self, packet: EnginePacket) -> bool {
        self.tx.send(packet).is_ok()
    }

    /// Queue a Socket.IO packet.
    pub fn send_socket(&self, packet: &SocketPacket) -> bool {
        match packet.encode() {
            Ok(body) => self.send(EnginePacket::Message(body)),
            Err(e) => {
                tracing::warn!(sid = %self.sid, err = %e, "failed to encode socket packet");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Whether the client completed the namespace connect.
    pub fn in_namespace(&self) -> bool {
        self.namespace.load(Ordering::Relaxed)
    }

    pub(crate) fn enter_namespace(&self) {
        self.namespace.store(true, Ordering::Relaxed);
    }

    pub fn user(&self) -> Option<RegisteredUser> {
        self.user.lock().clone()
    }

    pub(crate) fn register(&self, user: RegisteredUser) {
        *self.user.lock() = Some(user);
    }

    pub fn join(&self, room: &str) {
        self.rooms.lock().insert(room.to_string());
    }

    pub fn leave(&self, room: &str) {
        self.rooms.lock().remove(room);
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.lock().contains(room)
    }
}

/// Who an event is emitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Socket(&'a str),
    Room(&'a str),
    All,
}

/// Shared hub state: live sockets, chat history and notification backlog.
pub struct HubState {
    config: HubConfig,
    sockets: RwLock<HashMap<String, Arc<Socket>>>,
    pub history: ChatHistory,
    pub notifications: NotificationQueue,
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

impl HubState {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            history: ChatHistory::with_capacity(config.room_capacity),
            notifications: NotificationQueue::with_capacity(config.notification_capacity),
            sockets: RwLock::new(HashMap::new()),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new session and start its heartbeat.
    async fn open_socket(
        self: &Arc<Self>,
        framing: Framing,
    ) -> (Arc<Socket>, Option<mpsc::UnboundedReceiver<EnginePacket>>) {
        let sid = uuid::Uuid::now_v7().simple().to_string();
        let (socket, rx) = Socket::new(sid.clone(), framing);
        let socket = Arc::new(socket);
        self.sockets.write().await.insert(sid, Arc::clone(&socket));
        tokio::spawn(heartbeat(Arc::clone(self), Arc::clone(&socket)));
        (socket, rx)
    }

    fn handshake(&self, sid: &str, framing: Framing) -> Handshake {
        let upgrades = if framing == Framing::Polling && self.config.websocket {
            vec!["websocket".to_string()]
        } else {
            Vec::new()
        };
        Handshake {
            sid: sid.to_string(),
            upgrades,
            ping_interval: duration_millis(self.config.ping_interval),
            ping_timeout: duration_millis(self.config.ping_timeout),
            max_payload: MAX_PAYLOAD,
        }
    }

    pub async fn socket(&self, sid: &str) -> Option<Arc<Socket>> {
        self.sockets.read().await.get(sid).cloned()
    }

    /// Number of open sessions, registered or not.
    pub async fn connection_count(&self) -> usize {
        self.sockets.read().await.len()
    }

    /// Users that went through `register_user`, in no particular order.
    pub async fn registered_users(&self) -> Vec<RegisteredUser> {
        self.sockets
            .read()
            .await
            .values()
            .filter_map(|socket| socket.user())
            .collect()
    }

    /// Session id of the first socket registered as `user_id`.
    pub async fn find_user(&self, user_id: &Value) -> Option<String> {
        self.sockets
            .read()
            .await
            .values()
            .find(|socket| socket.user().is_some_and(|u| &u.user_id == user_id))
            .map(|socket| socket.sid.clone())
    }

    /// Emit a named event to every namespace member matching `target`,
    /// except `skip`. Returns how many sockets it was queued for.
    pub async fn emit(
        &self,
        target: Target<'_>,
        skip: Option<&str>,
        name: &str,
        data: &Value,
    ) -> usize {
        let body = match SocketPacket::event(name, data.clone()).encode() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(event = name, err = %e, "failed to encode event");
                return 0;
            }
        };

        let sockets = self.sockets.read().await;
        let mut delivered = 0;
        for socket in sockets.values() {
            if !socket.in_namespace() || skip == Some(socket.sid.as_str()) {
                continue;
            }
            let matches = match target {
                Target::Socket(sid) => socket.sid == sid,
                Target::Room(room) => socket.in_room(room),
                Target::All => true,
            };
            if matches && socket.send(EnginePacket::Message(body.clone())) {
                delivered += 1;
            }
        }
        drop(sockets);
        tracing::debug!(event = name, ?target, delivered, "event emitted");
        delivered
    }

    /// Process one inbound engine packet from `socket`.
    pub async fn handle_engine_packet(&self, socket: &Arc<Socket>, packet: EnginePacket) {
        match packet {
            EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                Ok(packet) => events::handle_packet(self, socket, packet).await,
                Err(e) => tracing::warn!(sid = %socket.sid, err = %e, "malformed socket packet"),
            },
            EnginePacket::Pong(_) => socket.pong.notify_one(),
            EnginePacket::Ping(probe) => {
                socket.send(EnginePacket::Pong(probe));
            }
            EnginePacket::Close => self.close_socket(&socket.sid, "client close").await,
            other => tracing::debug!(sid = %socket.sid, ?other, "ignoring engine packet"),
        }
    }

    /// End a session: drop it from the registry, release its transport and
    /// tell the others it left. Closing an unknown sid is a no-op.
    pub async fn close_socket(&self, sid: &str, reason: &str) {
        let removed = {
            let mut sockets = self.sockets.write().await;
            sockets.remove(sid)
        };
        let Some(socket) = removed else {
            return;
        };
        socket.closed.store(true, Ordering::Relaxed);
        socket.send(EnginePacket::Close);
        tracing::info!(sid, reason, framing = ?socket.framing, "socket closed");
        events::on_disconnect(self, &socket).await;
    }

    /// Close every open session, e.g. on shutdown.
    pub async fn close_all_connections(&self) {
        let sids: Vec<String> = self.sockets.read().await.keys().cloned().collect();
        for sid in sids {
            self.close_socket(&sid, "hub closing").await;
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_millis(duration: Duration) -> u64 {
    // Heartbeat settings are seconds to minutes.
    duration.as_millis() as u64
}

/// Ping the client every interval and close the session when a pong does
/// not come back in time.
async fn heartbeat(state: Arc<HubState>, socket: Arc<Socket>) {
    let ping_interval = state.config.ping_interval;
    let ping_timeout = state.config.ping_timeout;
    loop {
        tokio::time::sleep(ping_interval).await;
        if socket.is_closed() || !socket.send(EnginePacket::Ping(String::new())) {
            break;
        }
        if tokio::time::timeout(ping_timeout, socket.pong.notified())
            .await
            .is_err()
        {
            if !socket.is_closed() {
                state.close_socket(&socket.sid, "ping timeout").await;
            }
            break;
        }
    }
}

/// Engine.IO transport error answered with `400`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Transport unknown")]
    TransportUnknown,
    #[error("Session ID unknown")]
    SessionUnknown,
    #[error("Bad handshake method")]
    BadHandshakeMethod,
    #[error("Bad request")]
    BadRequest,
    #[error("Unsupported protocol version")]
    UnsupportedProtocolVersion,
}

impl EngineError {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::TransportUnknown => 0,
            Self::SessionUnknown => 1,
            Self::BadHandshakeMethod => 2,
            Self::BadRequest => 3,
            Self::UnsupportedProtocolVersion => 5,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let body = json!({ "code": self.code(), "message": self.to_string() });
        (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
    }
}

/// Query string of every `/socket.io/` request.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct EngineQuery {
    #[serde(rename = "EIO")]
    pub eio: Option<String>,
    pub transport: Option<String>,
    pub sid: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub username: Option<String>,
}

async fn engine_get(
    State(state): State<Arc<HubState>>,
    Query(query): Query<EngineQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if query.eio.as_deref() != Some("4") {
        return EngineError::UnsupportedProtocolVersion.into_response();
    }
    let transport = query.transport.clone();
    let sid = query.sid.clone();
    match (transport.as_deref(), sid.as_deref()) {
        (Some("polling"), Some(sid)) => long_poll(&state, sid).await,
        (Some("polling"), None) => polling_handshake(&state, &query).await,
        (Some("websocket"), None) if state.config.websocket => match upgrade {
            Ok(ws) => ws
                .on_upgrade(move |socket| run_websocket(state, socket, query))
                .into_response(),
            Err(_) => EngineError::BadRequest.into_response(),
        },
        (Some("websocket"), Some(_)) => EngineError::BadRequest.into_response(),
        _ => EngineError::TransportUnknown.into_response(),
    }
}

async fn engine_post(
    State(state): State<Arc<HubState>>,
    Query(query): Query<EngineQuery>,
    body: String,
) -> Response {
    let Some(sid) = query.sid.as_deref() else {
        return EngineError::BadHandshakeMethod.into_response();
    };
    let Some(socket) = state.socket(sid).await else {
        return EngineError::SessionUnknown.into_response();
    };
    if socket.framing != Framing::Polling {
        return EngineError::BadRequest.into_response();
    }
    // Overlapping POSTs end the session.
    let Ok(_in_flight) = socket.post.try_lock() else {
        tracing::warn!(sid, "data request overlap");
        state.close_socket(sid, "post overlap").await;
        return EngineError::BadRequest.into_response();
    };
    let packets = match codec::decode_payload(&body) {
        Ok(packets) => packets,
        Err(e) => {
            tracing::warn!(sid, err = %e, "malformed polling payload");
            return EngineError::BadRequest.into_response();
        }
    };
    for packet in packets {
        state.handle_engine_packet(&socket, packet).await;
    }
    ([(header::CONTENT_TYPE, "text/html")], "ok").into_response()
}

async fn polling_handshake(state: &Arc<HubState>, query: &EngineQuery) -> Response {
    let (socket, _) = state.open_socket(Framing::Polling).await;
    tracing::info!(
        sid = %socket.sid,
        user_id = query.user_id.as_deref().unwrap_or_default(),
        username = query.username.as_deref().unwrap_or_default(),
        "polling session opened"
    );
    polling_body(&[EnginePacket::Open(
        state.handshake(&socket.sid, Framing::Polling),
    )])
}

/// Hold the request until the session has packets, then flush them all.
async fn long_poll(state: &HubState, sid: &str) -> Response {
    let Some(socket) = state.socket(sid).await else {
        return EngineError::SessionUnknown.into_response();
    };
    let Some(queue) = socket.poll.as_ref() else {
        return EngineError::BadRequest.into_response();
    };
    // A second concurrent poll on the same session is a client error.
    let Ok(mut rx) = queue.try_lock() else {
        return EngineError::BadRequest.into_response();
    };

    let first = match tokio::time::timeout(state.config.ping_interval, rx.recv()).await {
        Ok(Some(packet)) => packet,
        Ok(None) => EnginePacket::Close,
        Err(_) => EnginePacket::Noop,
    };
    let mut packets = vec![first];
    while packets.last() != Some(&EnginePacket::Close) {
        match rx.try_recv() {
            Ok(packet) => packets.push(packet),
            Err(_) => break,
        }
    }
    drop(rx);
    polling_body(&packets)
}

fn polling_body(packets: &[EnginePacket]) -> Response {
    match codec::encode_payload(packets) {
        Ok(body) => ([(header::CONTENT_TYPE, POLL_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "failed to encode polling payload");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Drive one WebSocket session until either side goes away.
async fn run_websocket(state: Arc<HubState>, ws: WebSocket, query: EngineQuery) {
    let (socket, rx) = state.open_socket(Framing::WebSocket).await;
    let Some(mut rx) = rx else {
        state.close_socket(&socket.sid, "missing outbound queue").await;
        return;
    };
    tracing::info!(
        sid = %socket.sid,
        user_id = query.user_id.as_deref().unwrap_or_default(),
        username = query.username.as_deref().unwrap_or_default(),
        "websocket session opened"
    );

    let (mut ws_sender, mut ws_receiver) = ws.split();

    let open = EnginePacket::Open(state.handshake(&socket.sid, Framing::WebSocket));
    let sent = match open.encode() {
        Ok(text) => ws_sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(err = %e, "failed to encode handshake");
            false
        }
    };
    if !sent {
        state.close_socket(&socket.sid, "handshake failed").await;
        return;
    }

    let writer_sid = socket.sid.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            let closing = packet == EnginePacket::Close;
            let text = match packet.encode() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(sid = %writer_sid, err = %e, "failed to encode packet");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(sid = %writer_sid, "websocket write failed");
                break;
            }
            if closing {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_socket = Arc::clone(&socket);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match EnginePacket::decode(text.as_str()) {
                    Ok(packet) => {
                        reader_state
                            .handle_engine_packet(&reader_socket, packet)
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            sid = %reader_socket.sid,
                            err = %e,
                            "malformed engine packet"
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
            if reader_socket.is_closed() {
                break;
            }
        }
    });

    let writer_done = tokio::select! {
        _ = &mut read_task => false,
        _ = &mut write_task => {
            read_task.abort();
            true
        }
    };

    state.close_socket(&socket.sid, "transport closed").await;
    // Give the writer a moment to flush the queued close packet.
    if !writer_done
        && tokio::time::timeout(Duration::from_millis(200), &mut write_task)
            .await
            .is_err()
    {
        write_task.abort();
    }
}

/// The hub's HTTP surface.
pub fn router(state: Arc<HubState>) -> Router {
    Router::new()
        .route(SOCKET_PATH, get(engine_get).post(engine_post))
        .route("/api/websocket/test", post(api::trigger_event))
        .route("/api/websocket/stats", get(api::stats))
        .with_state(state)
}

/// Start a hub with default settings on `addr`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(HubState::new())).await
}

/// Start a hub around a pre-configured [`HubState`].
///
/// Returns the bound address (useful with port `0`) and the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<HubState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, handle))
}
