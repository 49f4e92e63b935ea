//! Socket.IO event routing.
//!
//! Chat events are scoped to the room named by `chantier_id` (`general`
//! when absent). Badge scans go to the `badges_all` room plus the site's own
//! `badges_<id>` room. Alerts, presence and broadcast notifications go to
//! everyone in the namespace.

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use sitesync_proto::codec::SocketPacket;

use crate::hub::{HubState, RegisteredUser, Socket, Target};

pub const DEFAULT_ROOM: &str = "general";
pub const ALL_BADGES_ROOM: &str = "badges_all";
const ANONYMOUS: &str = "Anonyme";

/// Current time as an ISO-8601 UTC timestamp.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn unique_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::now_v7().simple())
}

/// Room key named by `chantier_id`. Numeric ids are used in their decimal form.
fn room_of(data: &Value) -> String {
    match data.get("chantier_id") {
        None | Some(Value::Null) => DEFAULT_ROOM.to_string(),
        Some(Value::String(room)) => room.clone(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn text_or<'a>(data: &'a Value, key: &str, default: &'a str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn field(data: &Value, key: &str) -> Value {
    data.get(key).cloned().unwrap_or(Value::Null)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Handle one Socket.IO packet from `socket`.
pub async fn handle_packet(state: &HubState, socket: &Socket, packet: SocketPacket) {
    match packet {
        SocketPacket::Connect(_) => on_connect(state, socket).await,
        SocketPacket::Disconnect => state.close_socket(&socket.sid, "namespace disconnect").await,
        SocketPacket::Event { name, data, ack } if socket.in_namespace() => {
            on_event(state, socket, &name, &data).await;
            if let Some(id) = ack {
                socket.send_socket(&SocketPacket::Ack { id, data: Vec::new() });
            }
        }
        SocketPacket::Event { name, .. } => {
            tracing::warn!(
                sid = %socket.sid,
                event = %name,
                "event before namespace connect, dropping"
            );
        }
        other => tracing::debug!(sid = %socket.sid, ?other, "ignoring socket packet"),
    }
}

async fn on_connect(state: &HubState, socket: &Socket) {
    socket.enter_namespace();
    socket.send_socket(&SocketPacket::Connect(Some(json!({ "sid": socket.sid }))));
    state
        .emit(
            Target::Socket(&socket.sid),
            None,
            "connected",
            &json!({ "sid": socket.sid, "time": now_iso() }),
        )
        .await;
    tracing::info!(sid = %socket.sid, "client connected");
}

/// Tell everyone else a registered user left.
pub async fn on_disconnect(state: &HubState, socket: &Socket) {
    let Some(user) = socket.user() else {
        return;
    };
    state
        .emit(
            Target::All,
            Some(&socket.sid),
            "user_left",
            &json!({ "user": user.username, "time": now_iso() }),
        )
        .await;
}

async fn on_event(state: &HubState, socket: &Socket, name: &str, data: &Value) {
    match name {
        "register_user" => register_user(state, socket, data).await,
        "join_chat" => join_chat(state, socket, data).await,
        "leave_chat" => leave_chat(state, socket, data).await,
        "send_message" => send_message(state, data).await,
        "typing" => typing(state, socket, data).await,
        "subscribe_notifications" => subscribe_notifications(state, socket, data).await,
        "subscribe_badges" => subscribe_badges(socket, data),
        "new_badge" => new_badge(state, data).await,
        "alert" => alert(state, data).await,
        "update_presence" => update_presence(state, data).await,
        other => tracing::debug!(sid = %socket.sid, event = other, "unhandled event"),
    }
}

async fn register_user(state: &HubState, socket: &Socket, data: &Value) {
    let username = text_or(data, "username", ANONYMOUS).to_string();
    let user_id = match data.get("user_id") {
        None | Some(Value::Null) => Value::String(socket.sid.clone()),
        Some(id) => id.clone(),
    };
    tracing::info!(sid = %socket.sid, username = %username, user_id = %user_id, "user registered");
    socket.register(RegisteredUser {
        username: username.clone(),
        user_id,
        connected_at: now_iso(),
    });

    let total_users = state.registered_users().await.len();
    state
        .emit(
            Target::All,
            None,
            "user_joined",
            &json!({ "user": username, "total_users": total_users, "time": now_iso() }),
        )
        .await;
}

async fn join_chat(state: &HubState, socket: &Socket, data: &Value) {
    let room = room_of(data);
    let username = text_or(data, "username", ANONYMOUS);
    socket.join(&room);

    if let Some(history) = state
        .history
        .recent(&room, state.config().history_replay)
        .await
    {
        state
            .emit(Target::Socket(&socket.sid), None, "chat_history", &Value::Array(history))
            .await;
    }

    state
        .emit(
            Target::Room(&room),
            Some(&socket.sid),
            "user_joined_room",
            &json!({ "user": username, "room": room, "time": now_iso() }),
        )
        .await;
    tracing::debug!(sid = %socket.sid, room = %room, username, "joined chat");
}

async fn leave_chat(state: &HubState, socket: &Socket, data: &Value) {
    let room = room_of(data);
    let username = text_or(data, "username", ANONYMOUS);
    socket.leave(&room);
    state
        .emit(
            Target::Room(&room),
            Some(&socket.sid),
            "user_left_room",
            &json!({ "user": username, "room": room, "time": now_iso() }),
        )
        .await;
}

async fn send_message(state: &HubState, data: &Value) {
    let message = text_or(data, "message", "");
    if message.is_empty() {
        return;
    }
    let room = room_of(data);
    let stored = json!({
        "id": unique_id("msg"),
        "user": text_or(data, "username", ANONYMOUS),
        "user_id": field(data, "user_id"),
        "message": message,
        "time": now_iso(),
        "room": room,
    });
    state.history.append(&room, stored.clone()).await;
    state
        .emit(Target::Room(&room), None, "new_message", &stored)
        .await;
}

async fn typing(state: &HubState, socket: &Socket, data: &Value) {
    let room = room_of(data);
    let update = json!({
        "user": text_or(data, "username", ANONYMOUS),
        "typing": data.get("typing").and_then(Value::as_bool).unwrap_or(false),
        "room": room,
    });
    state
        .emit(Target::Room(&room), Some(&socket.sid), "user_typing", &update)
        .await;
}

async fn subscribe_notifications(state: &HubState, socket: &Socket, data: &Value) {
    let user_id = field(data, "user_id");
    let pending = state.notifications.pending_for(&user_id).await;
    tracing::debug!(
        sid = %socket.sid,
        user_id = %user_id,
        pending = pending.len(),
        "notifications subscribed"
    );
    if !pending.is_empty() {
        state
            .emit(
                Target::Socket(&socket.sid),
                None,
                "pending_notifications",
                &Value::Array(pending),
            )
            .await;
    }
}

fn subscribe_badges(socket: &Socket, data: &Value) {
    let room = match data.get("chantier_id") {
        None | Some(Value::Null) => ALL_BADGES_ROOM.to_string(),
        Some(id) => format!("badges_{}", display(id)),
    };
    tracing::debug!(sid = %socket.sid, room = %room, "badges subscribed");
    socket.join(&room);
}

async fn new_badge(state: &HubState, data: &Value) {
    let location = match data.get("location") {
        None | Some(Value::Null) => json!({}),
        Some(location) => location.clone(),
    };
    let badge = json!({
        "id": field(data, "badge_id"),
        "employe": field(data, "employe"),
        "type": field(data, "type"),
        "chantier_id": field(data, "chantier_id"),
        "chantier": field(data, "chantier_name"),
        "time": now_iso(),
        "location": location,
    });

    state
        .emit(Target::Room(ALL_BADGES_ROOM), None, "badge_update", &badge)
        .await;
    let site = &badge["chantier_id"];
    if !site.is_null() {
        let room = format!("badges_{}", display(site));
        state
            .emit(Target::Room(&room), None, "badge_update", &badge)
            .await;
    }

    let kind = if badge["type"] == "Entrée" { "info" } else { "warning" };
    send_notification(
        state,
        NotificationRequest {
            title: "Nouveau Badge".into(),
            message: format!(
                "{} - {} à {}",
                display(&badge["employe"]),
                display(&badge["type"]),
                display(&badge["chantier"])
            ),
            kind: kind.into(),
            broadcast: true,
            data: badge.clone(),
            ..NotificationRequest::default()
        },
    )
    .await;
    tracing::info!(employe = %badge["employe"], kind = %badge["type"], "badge scanned");
}

async fn alert(state: &HubState, data: &Value) {
    let alert = json!({
        "id": unique_id("alert"),
        "type": text_or(data, "type", "warning"),
        "title": text_or(data, "title", "Alerte"),
        "message": text_or(data, "message", ""),
        "source": text_or(data, "source", "system"),
        "data": data.get("data").cloned().unwrap_or_else(|| json!({})),
        "time": now_iso(),
    });
    state
        .emit(Target::All, None, "alert_broadcast", &alert)
        .await;
    send_notification(
        state,
        NotificationRequest {
            title: display(&alert["title"]),
            message: display(&alert["message"]),
            kind: display(&alert["type"]),
            broadcast: true,
            data: alert.clone(),
            ..NotificationRequest::default()
        },
    )
    .await;
    tracing::info!(title = %alert["title"], "alert broadcast");
}

async fn update_presence(state: &HubState, data: &Value) {
    let presence = json!({
        "employe_id": field(data, "employe_id"),
        "employe_name": field(data, "employe_name"),
        "status": field(data, "status"),
        "last_seen": now_iso(),
        "location": field(data, "location"),
    });
    state
        .emit(Target::All, None, "presence_update", &presence)
        .await;
}

/// Fields of a notification to emit.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub title: String,
    pub message: String,
    pub kind: String,
    /// Recipient when not broadcast.
    pub user_id: Value,
    pub broadcast: bool,
    pub data: Value,
}

impl Default for NotificationRequest {
    fn default() -> Self {
        Self {
            title: "Notification".into(),
            message: String::new(),
            kind: "info".into(),
            user_id: Value::Null,
            broadcast: false,
            data: json!({}),
        }
    }
}

/// Queue a notification for replay and deliver it.
///
/// Broadcasts reach every namespace member; otherwise only the first
/// socket registered as `user_id` gets it. Returns the emitted payload.
pub async fn send_notification(state: &HubState, request: NotificationRequest) -> Value {
    let notification = json!({
        "id": unique_id("notif"),
        "title": request.title,
        "message": request.message,
        "type": request.kind,
        "time": now_iso(),
        "user_id": request.user_id,
        "broadcast": request.broadcast,
        "data": request.data,
    });
    state.notifications.push(notification.clone()).await;

    if request.broadcast {
        state
            .emit(Target::All, None, "notification", &notification)
            .await;
    } else if let Some(sid) = state.find_user(&notification["user_id"]).await {
        state
            .emit(Target::Socket(&sid), None, "notification", &notification)
            .await;
    } else {
        tracing::debug!(
            user_id = %notification["user_id"],
            "notification recipient offline, queued only"
        );
    }
    notification
}
