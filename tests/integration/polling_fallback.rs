// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the long-polling fallback.
//!
//! The hub is started with WebSocket disabled, so the default client must
//! fall back to HTTP long-polling and still carry the full event flow.

use std::sync::Arc;
use std::time::Duration;

use sitesync::client::{ClientOptions, SyncClient};
use sitesync::identity::Identity;
use sitesync::transport::TransportType;
use sitesync_hub::hub::{HubConfig, HubState, start_server_with_state};

const WAIT: Duration = Duration::from_secs(5);

async fn polling_hub(config: HubConfig) -> (String, Arc<HubState>) {
    let state = Arc::new(HubState::with_config(HubConfig {
        websocket: false,
        ..config
    }));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("http://{addr}"), state)
}

async fn online(url: &str, id: i64, name: &str) -> SyncClient {
    let client = SyncClient::new(ClientOptions {
        socket_timeout: Duration::from_secs(2),
        ..ClientOptions::new(url)
    });
    client.connect(Identity::new(id, name)).await;
    assert!(client.wait_for_state(true, WAIT).await, "{name} never connected");
    client
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
// Tests
// =============================================================================

#[tokio::test]
async fn falls_back_to_polling() {
    let (url, _hub) = polling_hub(HubConfig::default()).await;
    let ana = online(&url, 1, "Ana").await;
    assert_eq!(ana.transport_type(), Some(TransportType::Polling));
}

#[tokio::test]
async fn chat_round_trip_over_polling() {
    let (url, _hub) = polling_hub(HubConfig::default()).await;
    let ana = online(&url, 1, "Ana").await;
    let luc = online(&url, 2, "Luc").await;

    ana.join_room("7");
    ana.send_message("7", "ana ready").unwrap();
    eventually("ana echo", || !ana.store().messages("7").is_empty()).await;
    luc.join_room("7");
    eventually("luc history", || !luc.store().messages("7").is_empty()).await;

    luc.send_message("7", "reçu").unwrap();
    eventually("ana receives", || {
        ana.store().messages("7").iter().any(|m| m.text == "reçu")
    })
    .await;
}

#[tokio::test]
async fn session_survives_many_heartbeats() {
    let (url, hub) = polling_hub(HubConfig {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(300),
        ..HubConfig::default()
    })
    .await;
    let ana = online(&url, 1, "Ana").await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(ana.is_connected());
    assert_eq!(hub.connection_count().await, 1);

    ana.join_room("1");
    ana.send_message("1", "still here").unwrap();
    eventually("echo after heartbeats", || !ana.store().messages("1").is_empty()).await;
}

#[tokio::test]
async fn hub_shutdown_is_noticed() {
    let (url, hub) = polling_hub(HubConfig::default()).await;
    let ana = online(&url, 1, "Ana").await;

    hub.close_all_connections().await;
    // The pending poll returns the close packet; the client goes offline
    // and immediately starts a fresh session.
    let mut connected = ana.connected();
    tokio::time::timeout(WAIT, connected.wait_for(|up| !*up))
        .await
        .unwrap()
        .unwrap();
    assert!(ana.wait_for_state(true, WAIT).await);
    assert_eq!(ana.transport_type(), Some(TransportType::Polling));
}
