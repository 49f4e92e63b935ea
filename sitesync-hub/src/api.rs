//! HTTP endpoints for poking the hub by hand.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::events::{self, NotificationRequest, now_iso, text_or};
use crate::hub::{HubState, Target};

/// `POST /api/websocket/test`: emit a sample notification, badge or alert.
pub async fn trigger_event(
    State(state): State<Arc<HubState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let kind = text_or(&body, "type", "notification").to_string();
    match kind.as_str() {
        "notification" => {
            events::send_notification(
                &state,
                NotificationRequest {
                    title: text_or(&body, "title", "Test Notification").into(),
                    message: text_or(&body, "message", "Ceci est une notification de test").into(),
                    kind: text_or(&body, "level", "info").into(),
                    broadcast: true,
                    ..NotificationRequest::default()
                },
            )
            .await;
        }
        "badge" => {
            let badge = json!({
                "employe": text_or(&body, "employe", "Test Employee"),
                "type": text_or(&body, "badge_type", "Entrée"),
                "chantier": text_or(&body, "chantier", "Chantier Test"),
                "time": now_iso(),
            });
            state.emit(Target::All, None, "badge_update", &badge).await;
        }
        "alert" => {
            let alert = json!({
                "type": text_or(&body, "level", "warning"),
                "title": text_or(&body, "title", "Test Alert"),
                "message": text_or(&body, "message", "Ceci est une alerte de test"),
                "time": now_iso(),
            });
            state.emit(Target::All, None, "alert_broadcast", &alert).await;
        }
        other => tracing::debug!(kind = other, "unknown test event, nothing emitted"),
    }
    Json(json!({ "success": true, "message": format!("Événement {kind} envoyé") }))
}

/// `GET /api/websocket/stats`.
pub async fn stats(State(state): State<Arc<HubState>>) -> Json<Value> {
    let mut users = state.registered_users().await;
    users.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
    let users: Vec<Value> = users
        .into_iter()
        .map(|u| json!({ "username": u.username, "connected_at": u.connected_at }))
        .collect();
    Json(json!({
        "connected_users": users.len(),
        "users": users,
        "chat_rooms": state.history.rooms().await,
        "total_messages": state.history.total().await,
        "pending_notifications": state.notifications.len().await,
    }))
}
