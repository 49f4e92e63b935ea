// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the badge scan workflow.
//!
//! A stub back office (axum) answers the matricule lookup and the badge
//! submission; the realtime side runs against an in-process hub.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use sitesync::badging::{BadgeError, BadgeRequest, record_badge};
use sitesync::client::{ClientOptions, SyncClient};
use sitesync::identity::Identity;
use sitesync::rest::{ApiClient, BadgeKind, DEFAULT_REQUEST_TIMEOUT};
use sitesync_hub::hub::start_server;
use sitesync_proto::presence::GeoPoint;

const WAIT: Duration = Duration::from_secs(5);

type Submissions = Arc<Mutex<Vec<Value>>>;

async fn employee(Path(matricule): Path<String>) -> (StatusCode, Json<Value>) {
    if matricule == "M-42" {
        (
            StatusCode::OK,
            Json(json!({"employe": {"id": 42, "matricule": "M-42", "nom_complet": "Ana Diallo"}})),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Employé non trouvé"})),
        )
    }
}

async fn submit(State(submissions): State<Submissions>, Json(body): Json<Value>) -> Json<Value> {
    submissions.lock().push(body);
    Json(json!({"success": true, "message": "Badge enregistré"}))
}

/// Start the stub back office, returning its URL and the recorded submissions.
async fn back_office() -> (String, Submissions) {
    let submissions = Submissions::default();
    let router = Router::new()
        .route("/api/employes/matricule/{matricule}", get(employee))
        .route("/api/badges/submit", post(submit))
        .with_state(Arc::clone(&submissions));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), submissions)
}

async fn operator_online() -> SyncClient {
    let (addr, _handle) = start_server("127.0.0.1:0").await.unwrap();
    let client = SyncClient::new(ClientOptions::new(format!("http://{addr}")));
    client.connect(Identity::new(5, "Chef Marc")).await;
    assert!(client.wait_for_state(true, WAIT).await);
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
async fn scan_is_recorded_and_announced() {
    let (api_url, submissions) = back_office().await;
    let api = ApiClient::new(&api_url, DEFAULT_REQUEST_TIMEOUT).unwrap();
    let client = operator_online().await;

    let request = BadgeRequest::new(" M-42 ", BadgeKind::Entree).with_location(GeoPoint {
        latitude: 48.85,
        longitude: 2.35,
    });
    let receipt = record_badge(&api, &client, &request).await.unwrap();

    assert!(receipt.announced);
    assert_eq!(receipt.employee.display_name(), "Ana Diallo");
    assert_eq!(receipt.ack["success"], true);

    let recorded = submissions.lock().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0]["matricule"], "M-42");
    assert_eq!(recorded[0]["type_badge"], "Entrée");
    assert_eq!(recorded[0]["latitude"], 48.85);
    assert!(recorded[0]["timestamp"].as_str().unwrap().ends_with('Z'));

    // The operator is subscribed to every badge, so the announcement comes back.
    eventually("badge feed", || !client.store().badges().is_empty()).await;
    let badge = &client.store().badges()[0];
    assert_eq!(badge.kind, "Entrée");
    assert_eq!(badge.employe, "Chef Marc");
    assert_eq!(badge.site(), Some("Bureau"));
}

#[tokio::test]
async fn offline_scan_is_still_recorded() {
    let (api_url, submissions) = back_office().await;
    let api = ApiClient::new(&api_url, DEFAULT_REQUEST_TIMEOUT).unwrap();
    let client = SyncClient::new(ClientOptions::new("http://127.0.0.1:9"));

    let receipt = record_badge(&api, &client, &BadgeRequest::new("M-42", BadgeKind::Sortie))
        .await
        .unwrap();
    assert!(!receipt.announced);
    assert_eq!(submissions.lock().len(), 1);
    assert_eq!(submissions.lock()[0]["type_badge"], "Sortie");
}

#[tokio::test]
async fn unknown_matricule_is_not_submitted() {
    let (api_url, submissions) = back_office().await;
    let api = ApiClient::new(&api_url, DEFAULT_REQUEST_TIMEOUT).unwrap();
    let client = SyncClient::new(ClientOptions::new("http://127.0.0.1:9"));

    let err = record_badge(&api, &client, &BadgeRequest::new("Z-0", BadgeKind::Pause))
        .await
        .unwrap_err();
    assert!(matches!(err, BadgeError::UnknownMatricule(ref m) if m == "Z-0"), "{err:?}");
    assert!(submissions.lock().is_empty());
}

#[tokio::test]
async fn blank_matricule_is_rejected_locally() {
    // No server behind this URL: validation must fail before any request.
    let api = ApiClient::new("http://127.0.0.1:9", DEFAULT_REQUEST_TIMEOUT).unwrap();
    let client = SyncClient::new(ClientOptions::new("http://127.0.0.1:9"));

    let err = record_badge(&api, &client, &BadgeRequest::new("   ", BadgeKind::Reprise))
        .await
        .unwrap_err();
    assert!(matches!(err, BadgeError::EmptyMatricule));
}
