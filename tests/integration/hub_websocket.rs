// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! End-to-end tests against an in-process hub over WebSocket.
//!
//! Two or three clients share a hub; each test drives one of the chat,
//! typing, badge, alert and presence flows and checks what the other
//! clients' stores end up holding.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, json};
use sitesync::client::{ClientOptions, SyncClient};
use sitesync::identity::{Identity, UserId};
use sitesync::transport::TransportType;
use sitesync_hub::hub::{HubState, start_server_with_state};
use sitesync_proto::presence::{GeoPoint, PresenceStatus};

const WAIT: Duration = Duration::from_secs(5);

async fn hub() -> (String, Arc<HubState>) {
    let state = Arc::new(HubState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("http://{addr}"), state)
}

async fn online(url: &str, id: i64, name: &str) -> SyncClient {
    let client = SyncClient::new(ClientOptions::new(url));
    client.connect(Identity::new(id, name)).await;
    assert!(client.wait_for_state(true, WAIT).await, "{name} never connected");
    client
}

/// Poll `check` until it holds or the wait runs out.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

/// Join `room` and wait for our own echo, which proves the hub processed
/// the join (and the subscription replay before it).
async fn join_confirmed(client: &SyncClient, room: &str) {
    let marker = format!("{} here", client.identity().unwrap().name);
    client.join_room(room);
    client.send_message(room, &marker).unwrap();
    eventually("own echo", || {
        client.store().messages(room).iter().any(|m| m.text == marker)
    })
    .await;
}

// =============================================================================
// Chat
// =============================================================================

#[tokio::test]
async fn messages_reach_room_members_only() {
    let (url, _hub) = hub().await;
    let ana = online(&url, 1, "Ana").await;
    let luc = online(&url, 2, "Luc").await;
    let marc = online(&url, 3, "Marc").await;
    assert_eq!(ana.transport_type(), Some(TransportType::WebSocket));

    join_confirmed(&ana, "7").await;
    join_confirmed(&luc, "7").await;
    join_confirmed(&marc, "8").await;

    ana.send_message("7", "béton livré").unwrap();
    eventually("luc receives", || {
        luc.store().messages("7").iter().any(|m| m.text == "béton livré")
    })
    .await;

    let received = luc.store().messages("7");
    let message = received.iter().find(|m| m.text == "béton livré").unwrap();
    assert_eq!(message.user, "Ana");
    assert_eq!(message.user_id, Some(UserId::Number(1)));
    assert!(message.id.starts_with("msg_"));
    assert!(marc.store().messages("7").is_empty());
}

#[tokio::test]
async fn late_joiner_gets_history() {
    let (url, _hub) = hub().await;
    let ana = online(&url, 1, "Ana").await;
    join_confirmed(&ana, "site-4").await;
    ana.send_message("site-4", "second").unwrap();
    eventually("second echo", || ana.store().messages("site-4").len() == 2).await;

    let luc = online(&url, 2, "Luc").await;
    luc.join_room("site-4");
    eventually("history", || luc.store().messages("site-4").len() == 2).await;
    let texts: Vec<String> = luc
        .store()
        .messages("site-4")
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["Ana here", "second"]);
}

#[tokio::test]
async fn typing_is_not_echoed_to_the_typist() {
    let (url, _hub) = hub().await;
    let ana = online(&url, 1, "Ana").await;
    let luc = online(&url, 2, "Luc").await;
    join_confirmed(&ana, "7").await;
    join_confirmed(&luc, "7").await;

    ana.send_typing("7", true).unwrap();
    eventually("typing shown", || luc.store().typist("7").as_deref() == Some("Ana")).await;
    assert_eq!(ana.store().typist("7"), None);

    ana.send_typing("7", false).unwrap();
    eventually("typing cleared", || luc.store().typist("7").is_none()).await;
}

// =============================================================================
// Badges and presence
// =============================================================================

#[tokio::test]
async fn badge_scan_is_broadcast_with_a_notification() {
    let (url, hub) = hub().await;
    let ana = online(&url, 1, "Ana").await;
    let luc = online(&url, 2, "Luc").await;
    // Confirms both replays (and so the badge subscriptions) went through.
    join_confirmed(&ana, "general").await;
    join_confirmed(&luc, "general").await;

    let mut fields = Map::new();
    fields.insert("matricule".into(), json!("M-42"));
    fields.insert("type".into(), json!("Entrée"));
    fields.insert("chantier_name".into(), json!("Tour B"));
    ana.send_badge(fields).unwrap();

    eventually("badge on luc", || !luc.store().badges().is_empty()).await;
    let badge = &luc.store().badges()[0];
    assert_eq!(badge.employe, "Ana");
    assert_eq!(badge.kind, "Entrée");
    assert_eq!(badge.site(), Some("Tour B"));

    eventually("notification on luc", || {
        luc.store()
            .notifications()
            .iter()
            .any(|n| n.title == "Nouveau Badge")
    })
    .await;
    let notification = luc
        .store()
        .notifications()
        .into_iter()
        .find(|n| n.title == "Nouveau Badge")
        .unwrap();
    assert_eq!(notification.message, "Ana - Entrée à Tour B");
    assert_eq!(notification.kind, "info");
    assert_eq!(hub.notifications.len().await, 1);
}

#[tokio::test]
async fn pending_notifications_replayed_on_connect() {
    let (url, _hub) = hub().await;
    let ana = online(&url, 1, "Ana").await;
    join_confirmed(&ana, "general").await;
    let mut fields = Map::new();
    fields.insert("type".into(), json!("Sortie"));
    ana.send_badge(fields).unwrap();
    eventually("own notification", || !ana.store().notifications().is_empty()).await;

    let luc = online(&url, 2, "Luc").await;
    eventually("backlog", || !luc.store().notifications().is_empty()).await;
    let backlog = luc.store().notifications();
    assert_eq!(backlog[0].kind, "warning");
}

#[tokio::test]
async fn presence_updates_are_broadcast() {
    let (url, _hub) = hub().await;
    let ana = online(&url, 1, "Ana").await;
    let luc = online(&url, 2, "Luc").await;
    join_confirmed(&luc, "general").await;

    ana.update_presence(
        PresenceStatus::Away,
        Some(GeoPoint {
            latitude: 48.85,
            longitude: 2.35,
        }),
    )
    .unwrap();
    eventually("presence", || luc.store().presence(&UserId::Number(1)).is_some()).await;
    let presence = luc.store().presence(&UserId::Number(1)).unwrap();
    assert_eq!(presence.employe_name, "Ana");
    assert_eq!(presence.status(), Some(PresenceStatus::Away));
    assert!(presence.last_seen.is_some());
}

#[tokio::test]
async fn hub_stats_reflect_sessions() {
    let (url, hub) = hub().await;
    let ana = online(&url, 1, "Ana").await;
    join_confirmed(&ana, "7").await;

    let stats: serde_json::Value = reqwest::get(format!("{url}/api/websocket/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["connected_users"], 1);
    assert_eq!(stats["users"][0]["username"], "Ana");
    assert_eq!(stats["chat_rooms"], json!(["7"]));
    assert_eq!(stats["total_messages"], 1);

    ana.disconnect().await;
    let forgotten = tokio::time::timeout(WAIT, async {
        while hub.connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(forgotten.is_ok(), "hub kept the closed session");
}
