// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for subscription replay.
//!
//! Every successful connect must announce the user, subscribe to
//! notifications and badges, then re-join each desired room, in that order.
//! The server side is played over loopback links so the exact packet
//! sequence can be asserted.

use std::time::Duration;

use serde_json::{Value, json};
use sitesync::client::{ClientOptions, ReconnectConfig, SyncClient};
use sitesync::identity::Identity;
use sitesync::subscription::RoomChange;
use sitesync::transport::Transport;
use sitesync::transport::loopback::{LoopbackConnector, LoopbackTransport};
use sitesync_proto::codec::SocketPacket;

const WAIT: Duration = Duration::from_secs(5);

fn options() -> ClientOptions {
    ClientOptions {
        socket_timeout: Duration::from_secs(2),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            jitter: 0.0,
            max_attempts: 0,
        },
        ..ClientOptions::new("http://hub.test")
    }
}

async fn recv(server: &LoopbackTransport) -> SocketPacket {
    tokio::time::timeout(WAIT, server.recv())
        .await
        .expect("server recv timed out")
        .unwrap()
}

/// Acknowledge the namespace connect on `server`.
async fn accept(server: &LoopbackTransport) {
    assert_eq!(recv(server).await, SocketPacket::Connect(None));
    server
        .send(&SocketPacket::Connect(Some(json!({"sid": "s"}))))
        .await
        .unwrap();
}

/// Receive `count` events, returning `(name, payload)` pairs.
async fn events(server: &LoopbackTransport, count: usize) -> Vec<(String, Value)> {
    let mut received = Vec::with_capacity(count);
    while received.len() < count {
        match recv(server).await {
            SocketPacket::Event { name, data, .. } => received.push((name, data)),
            other => panic!("expected an event, got {other:?}"),
        }
    }
    received
}

fn names(events: &[(String, Value)]) -> Vec<&str> {
    events.iter().map(|(name, _)| name.as_str()).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn replay_follows_connect_in_order() {
    let connector = LoopbackConnector::new();
    let server = connector.accept_next();
    let client = SyncClient::with_connector(connector, options());

    assert_eq!(client.join_room("12"), RoomChange::Recorded);
    assert_eq!(client.join_room("3"), RoomChange::Recorded);
    client.connect(Identity::new(7, "Ana")).await;
    accept(&server).await;

    let replay = events(&server, 5).await;
    assert_eq!(
        names(&replay),
        vec![
            "register_user",
            "subscribe_notifications",
            "subscribe_badges",
            "join_chat",
            "join_chat",
        ]
    );
    assert_eq!(replay[0].1, json!({"username": "Ana", "user_id": 7}));
    assert_eq!(replay[1].1, json!({"user_id": 7}));
    // Rooms come back in first-join order.
    let rooms: Vec<&Value> = replay[3..].iter().map(|(_, data)| &data["chantier_id"]).collect();
    assert_eq!(rooms, vec![&json!("12"), &json!("3")]);
}

#[tokio::test]
async fn reconnect_replays_current_rooms_only() {
    let connector = LoopbackConnector::new();
    let first = connector.accept_next();
    let client = SyncClient::with_connector(connector.clone(), options());

    client.connect(Identity::new("u-9", "Luc")).await;
    accept(&first).await;
    assert_eq!(
        names(&events(&first, 3).await),
        vec!["register_user", "subscribe_notifications", "subscribe_badges"]
    );

    assert_eq!(client.join_room("a"), RoomChange::Emitted);
    assert_eq!(client.join_room("b"), RoomChange::Emitted);
    assert_eq!(names(&events(&first, 2).await), vec!["join_chat", "join_chat"]);
    assert_eq!(client.leave_room("a"), RoomChange::Emitted);
    let left = events(&first, 1).await;
    assert_eq!(left[0].0, "leave_chat");
    assert_eq!(left[0].1["chantier_id"], "a");

    // Drop the link; the supervisor reconnects on the next queued one.
    let second = connector.accept_next();
    first.send(&SocketPacket::Disconnect).await.unwrap();
    assert!(client.wait_for_state(false, WAIT).await);
    accept(&second).await;
    assert!(client.wait_for_state(true, WAIT).await);

    let replay = events(&second, 4).await;
    assert_eq!(
        names(&replay),
        vec!["register_user", "subscribe_notifications", "subscribe_badges", "join_chat"]
    );
    assert_eq!(replay[3].1, json!({"chantier_id": "b", "username": "Luc"}));
}

#[tokio::test]
async fn no_replay_until_namespace_ack() {
    let connector = LoopbackConnector::new();
    let server = connector.accept_next();
    let client = SyncClient::with_connector(connector, options());
    client.connect(Identity::new(1, "Ana")).await;

    assert_eq!(recv(&server).await, SocketPacket::Connect(None));
    let early = tokio::time::timeout(Duration::from_millis(150), server.recv()).await;
    assert!(early.is_err(), "nothing may be emitted before the ack: {early:?}");
    assert!(!client.is_connected());

    server
        .send(&SocketPacket::Connect(Some(json!({"sid": "s"}))))
        .await
        .unwrap();
    assert_eq!(events(&server, 1).await[0].0, "register_user");
}

#[tokio::test]
async fn join_while_offline_is_replayed_once_online() {
    let connector = LoopbackConnector::new();
    let client = SyncClient::with_connector(connector.clone(), options());
    client.connect(Identity::new(2, "Marc")).await;

    // First attempts fail: nothing queued on the connector.
    tokio::time::timeout(WAIT, async {
        while connector.attempts() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(client.join_room("9"), RoomChange::Recorded);
    assert_eq!(client.desired_rooms(), vec!["9".to_string()]);

    let server = connector.accept_next();
    accept(&server).await;
    let replay = events(&server, 4).await;
    assert_eq!(replay[3].0, "join_chat");
    assert_eq!(replay[3].1["chantier_id"], "9");
}
