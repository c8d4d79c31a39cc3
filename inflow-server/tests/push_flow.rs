//! Push-endpoint tests over the in-memory adapters.

use std::sync::Arc;

use axum_test::TestServer;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;

use inflow_core::gate::{MemoryGate, MetadataGate};
use inflow_core::record::FolderState;
use inflow_core::store::MemoryObjectStore;
use inflow_core::testsupport::RecordingNotifier;
use inflow_core::{FolderWatchService, WatchConfig};
use inflow_server::handlers::{router, AppState};

struct Harness {
    server: TestServer,
    gate: Arc<MemoryGate>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let gate = Arc::new(MemoryGate::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let service = FolderWatchService::new(
        WatchConfig {
            monitored_prefixes: vec!["test/".to_string()],
            ..WatchConfig::default()
        },
        gate.clone(),
        Arc::new(MemoryObjectStore::new()),
        notifier.clone(),
    );
    let server = TestServer::new(router(AppState { service })).unwrap();
    Harness {
        server,
        gate,
        notifier,
    }
}

fn envelope(bucket: &str, key: &str) -> serde_json::Value {
    let payload = json!({
        "name": key,
        "bucket": bucket,
        "timeCreated": "2026-01-05T10:00:00Z",
    });
    json!({
        "message": {
            "data": BASE64.encode(payload.to_string()),
            "messageId": "m-1",
        }
    })
}

#[tokio::test]
async fn duplicate_delivery_yields_one_record_and_one_notification() {
    let h = harness();
    let body = envelope("incoming-data", "test/a/f1.jsonl.gz");

    let first = h.server.post("/").json(&body).await;
    first.assert_status_ok();
    let second = h.server.post("/").json(&body).await;
    second.assert_status_ok();

    assert_eq!(h.notifier.initial_posts(), vec!["test/a".to_string()]);
    let record = h.gate.get("test/a").await.unwrap().unwrap();
    assert_eq!(record.state, FolderState::Open);
    assert_eq!(record.generation, 1);
}

#[tokio::test]
async fn poison_payload_is_acknowledged() {
    let h = harness();
    let body = json!({
        "message": { "data": BASE64.encode("this is not json") }
    });
    let response = h.server.post("/").json(&body).await;
    response.assert_status_ok();
    assert!(h.notifier.initial_posts().is_empty());
}

#[tokio::test]
async fn missing_envelope_is_a_bad_request() {
    let h = harness();
    let response = h.server.post("/").json(&json!({ "nope": true })).await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn events_outside_monitored_prefixes_are_ignored() {
    let h = harness();
    let response = h
        .server
        .post("/")
        .json(&envelope("incoming-data", "Archive/f1.jsonl.gz"))
        .await;
    response.assert_status_ok();
    assert!(h.gate.get("Archive").await.unwrap().is_none());
}

#[tokio::test]
async fn health_and_warmup_respond() {
    let h = harness();
    let health = h.server.get("/health").await;
    health.assert_status_ok();
    health.assert_json(&json!({ "status": "healthy" }));

    let warmup = h.server.get("/_ah/warmup").await;
    warmup.assert_status_ok();
    assert_eq!(warmup.text(), "OK");
}
