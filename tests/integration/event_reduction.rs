// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for folding server events into the store.
//!
//! A loopback server pushes each inbound event kind through a live session
//! and the tests observe the resulting projections and change signals.

use std::time::Duration;

use serde_json::{Value, json};
use sitesync::client::{ClientOptions, SyncClient};
use sitesync::identity::{Identity, UserId};
use sitesync::store::{Change, StoreLimits};
use sitesync::transport::Transport;
use sitesync::transport::loopback::{LoopbackConnector, LoopbackTransport};
use sitesync_proto::codec::SocketPacket;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

struct Session {
    client: SyncClient<LoopbackConnector>,
    server: LoopbackTransport,
    changes: broadcast::Receiver<Change>,
}

async fn online(limits: StoreLimits) -> Session {
    let connector = LoopbackConnector::new();
    let server = connector.accept_next();
    let client = SyncClient::with_connector(
        connector,
        ClientOptions {
            limits,
            ..ClientOptions::new("http://hub.test")
        },
    );
    let changes = client.store().changes();
    client.connect(Identity::new(1, "Ana")).await;

    let first = tokio::time::timeout(WAIT, server.recv()).await.unwrap().unwrap();
    assert_eq!(first, SocketPacket::Connect(None));
    server
        .send(&SocketPacket::Connect(Some(json!({"sid": "s"}))))
        .await
        .unwrap();
    assert!(client.wait_for_state(true, WAIT).await);
    Session {
        client,
        server,
        changes,
    }
}

impl Session {
    async fn push(&self, name: &str, data: Value) {
        self.server
            .send(&SocketPacket::event(name, data))
            .await
            .unwrap();
    }

    async fn next_change(&mut self) -> Change {
        tokio::time::timeout(WAIT, self.changes.recv())
            .await
            .expect("no change observed")
            .unwrap()
    }
}

// =============================================================================
// Chat
// =============================================================================

#[tokio::test]
async fn history_then_live_messages() {
    let mut session = online(StoreLimits::default()).await;
    session
        .push(
            "chat_history",
            json!([
                {"id": "m1", "user": "Luc", "message": "hello", "time": "t1", "room": "7"},
                {"id": "m2", "user": "Ana", "message": "hi", "time": "t2", "room": "7"},
            ]),
        )
        .await;
    assert_eq!(
        session.next_change().await,
        Change::Messages { room: "7".into() }
    );

    session
        .push(
            "new_message",
            json!({
                "id": "m3",
                "user": "Luc",
                "user_id": 4,
                "message": "on my way",
                "time": "t3",
                "room": "7",
            }),
        )
        .await;
    assert_eq!(
        session.next_change().await,
        Change::Messages { room: "7".into() }
    );

    let texts: Vec<String> = session
        .client
        .store()
        .messages("7")
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["hello", "hi", "on my way"]);
}

#[tokio::test]
async fn typing_indicator_tracks_latest_state() {
    let mut session = online(StoreLimits::default()).await;
    session
        .push("user_typing", json!({"user": "Luc", "typing": true, "room": "7"}))
        .await;
    assert_eq!(session.next_change().await, Change::Typing { room: "7".into() });
    assert_eq!(session.client.store().typist("7").as_deref(), Some("Luc"));

    session
        .push("user_typing", json!({"user": "Luc", "typing": false, "room": "7"}))
        .await;
    session.next_change().await;
    assert_eq!(session.client.store().typist("7"), None);
}

// =============================================================================
// Notifications, alerts and badges
// =============================================================================

#[tokio::test]
async fn notifications_newest_first_and_bounded() {
    let mut session = online(StoreLimits {
        badges: 50,
        notifications: 3,
    })
    .await;

    session
        .push(
            "pending_notifications",
            json!([
                {"id": "p1", "title": "Old 1"},
                {"id": "p2", "title": "Old 2"},
            ]),
        )
        .await;
    session.next_change().await;

    for i in 0..2 {
        session
            .push("notification", json!({"id": format!("n{i}"), "title": format!("Live {i}")}))
            .await;
        assert_eq!(session.next_change().await, Change::Notifications);
    }

    let titles: Vec<String> = session
        .client
        .store()
        .notifications()
        .into_iter()
        .map(|n| n.title)
        .collect();
    assert_eq!(titles, vec!["Live 1", "Live 0", "Old 1"]);
}

#[tokio::test]
async fn alerts_become_notifications() {
    let mut session = online(StoreLimits::default()).await;
    session
        .push(
            "alert_broadcast",
            json!({
                "id": "alert_1",
                "type": "danger",
                "title": "Fuite",
                "message": "Bât. C",
                "time": "t",
            }),
        )
        .await;
    assert_eq!(session.next_change().await, Change::Notifications);

    let notifications = session.client.store().notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].title, "Fuite");
    assert_eq!(notifications[0].kind, "danger");
}

#[tokio::test]
async fn badge_updates_feed_the_badge_list() {
    let mut session = online(StoreLimits::default()).await;
    session
        .push(
            "badge_update",
            json!({
                "id": 11,
                "employe": "Luc",
                "type": "Entrée",
                "chantier": "Tour B",
                "time": "t",
            }),
        )
        .await;
    assert_eq!(session.next_change().await, Change::Badges);

    let badges = session.client.store().badges();
    assert_eq!(badges[0].employe, "Luc");
    assert_eq!(badges[0].site(), Some("Tour B"));
}

// =============================================================================
// Presence and noise
// =============================================================================

#[tokio::test]
async fn presence_is_keyed_by_employee() {
    let mut session = online(StoreLimits::default()).await;
    session
        .push(
            "presence_update",
            json!({"employe_id": 4, "employe_name": "Luc", "status": "online", "last_seen": "t"}),
        )
        .await;
    assert_eq!(
        session.next_change().await,
        Change::Presence {
            employe_id: UserId::Number(4)
        }
    );
    session
        .push(
            "presence_update",
            json!({"employe_id": 4, "employe_name": "Luc", "status": "away", "last_seen": "t2"}),
        )
        .await;
    session.next_change().await;

    let presence = session.client.store().presence(&UserId::Number(4)).unwrap();
    assert_eq!(presence.status, "away");
}

#[tokio::test]
async fn unknown_and_housekeeping_events_change_nothing() {
    let mut session = online(StoreLimits::default()).await;
    session.push("user_joined", json!({"user": "Luc"})).await;
    session.push("mystery", json!({"x": 1})).await;
    session.push("new_message", json!("not an object")).await;
    session
        .push("notification", json!({"id": "after", "title": "Still alive"}))
        .await;

    // The first change is the notification: everything before it was ignored.
    assert_eq!(session.next_change().await, Change::Notifications);
    assert!(session.client.is_connected());
    assert!(session.client.store().messages("general").is_empty());
}
