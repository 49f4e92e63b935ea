// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for connection loss and recovery.
//!
//! Covers a hub dropping every session, scripted outages over loopback,
//! the attempt limit and an explicit disconnect stopping the retries.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sitesync::client::{ClientOptions, ReconnectConfig, SyncClient};
use sitesync::identity::Identity;
use sitesync::transport::Transport;
use sitesync::transport::loopback::LoopbackConnector;
use sitesync_hub::hub::{HubState, start_server_with_state};
use sitesync_proto::codec::SocketPacket;

const WAIT: Duration = Duration::from_secs(5);

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(80),
        jitter: 0.0,
        max_attempts,
    }
}

fn options(url: &str, max_attempts: u32) -> ClientOptions {
    ClientOptions {
        socket_timeout: Duration::from_secs(2),
        reconnect: fast_reconnect(max_attempts),
        ..ClientOptions::new(url)
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

// =============================================================================
// Against the hub
// =============================================================================

#[tokio::test]
async fn rooms_survive_a_hub_side_drop() {
    let state = Arc::new(HubState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    let url = format!("http://{addr}");

    let ana = SyncClient::new(options(&url, 0));
    ana.connect(Identity::new(1, "Ana")).await;
    assert!(ana.wait_for_state(true, WAIT).await);
    ana.join_room("7");
    ana.send_message("7", "before").unwrap();
    eventually("first echo", || ana.store().messages("7").len() == 1).await;

    let mut connected = ana.connected();
    state.close_all_connections().await;
    tokio::time::timeout(WAIT, connected.wait_for(|up| !*up))
        .await
        .unwrap()
        .unwrap();
    assert!(ana.is_running(), "supervisor must keep retrying");
    assert!(ana.wait_for_state(true, WAIT).await);

    // The rejoin is replayed, so room traffic from others reaches us again.
    let luc = SyncClient::new(options(&url, 0));
    luc.connect(Identity::new(2, "Luc")).await;
    assert!(luc.wait_for_state(true, WAIT).await);
    luc.join_room("7");
    eventually("luc history", || !luc.store().messages("7").is_empty()).await;
    luc.send_message("7", "after").unwrap();
    eventually("ana hears luc", || {
        ana.store().messages("7").iter().any(|m| m.text == "after")
    })
    .await;
    assert_eq!(ana.desired_rooms(), vec!["7".to_string()]);
}

// =============================================================================
// Scripted outages
// =============================================================================

#[tokio::test]
async fn retries_until_the_server_is_back() {
    let connector = LoopbackConnector::new();
    let client = SyncClient::with_connector(connector.clone(), options("http://hub.test", 0));
    client.connect(Identity::new(1, "Ana")).await;

    eventually("a few failures", || connector.attempts() >= 3).await;
    assert!(!client.is_connected());

    let server = connector.accept_next();
    assert_eq!(server.recv().await.unwrap(), SocketPacket::Connect(None));
    server
        .send(&SocketPacket::Connect(Some(json!({"sid": "s"}))))
        .await
        .unwrap();
    assert!(client.wait_for_state(true, WAIT).await);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let connector = LoopbackConnector::new();
    let client = SyncClient::with_connector(connector.clone(), options("http://hub.test", 2));
    client.connect(Identity::new(1, "Ana")).await;

    eventually("supervisor stops", || !client.is_running()).await;
    // The initial attempt plus two retries.
    assert_eq!(connector.attempts(), 3);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn disconnect_stops_retrying() {
    let connector = LoopbackConnector::new();
    let client = SyncClient::with_connector(connector.clone(), options("http://hub.test", 0));
    client.connect(Identity::new(1, "Ana")).await;
    eventually("first failure", || connector.attempts() >= 1).await;

    client.disconnect().await;
    assert!(!client.is_running());
    assert!(client.identity().is_none());
    let attempts = connector.attempts();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connector.attempts(), attempts);
}

#[tokio::test]
async fn ack_timeout_counts_as_a_failed_attempt() {
    let connector = LoopbackConnector::new();
    let silent = connector.accept_next();
    let client = SyncClient::with_connector(
        connector.clone(),
        ClientOptions {
            socket_timeout: Duration::from_millis(100),
            ..options("http://hub.test", 0)
        },
    );
    client.connect(Identity::new(1, "Ana")).await;
    assert_eq!(silent.recv().await.unwrap(), SocketPacket::Connect(None));

    // Never acknowledged: the client must move on to a new link.
    let server = connector.accept_next();
    assert_eq!(
        tokio::time::timeout(WAIT, server.recv()).await.unwrap().unwrap(),
        SocketPacket::Connect(None)
    );
    server
        .send(&SocketPacket::Connect(Some(json!({"sid": "s2"}))))
        .await
        .unwrap();
    assert!(client.wait_for_state(true, WAIT).await);
}
