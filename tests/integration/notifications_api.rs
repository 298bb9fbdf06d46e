//! HTTP API tests: API-key auth, notification lifecycle and callbacks.

use std::net::SocketAddr;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serviceradar::alerting::sign_payload;
use serviceradar::api::middleware::auth::{hash_key, PERM_ADMIN, PERM_READ, PERM_WRITE};
use serviceradar::api::{spawn_api_server, ApiState};
use serviceradar::store::ApiKeyRow;
use tokio::sync::watch;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

const ADMIN_ID: &str = "bootstrap";
const ADMIN_SECRET: &str = "admin-secret";

/// Spawn the API for a harness with a seeded admin key. The watch sender
/// is returned so the server lives until the test drops it.
async fn spawn_api(core: &CoreHarness) -> (String, watch::Sender<bool>) {
    core.store
        .create_api_key(&ApiKeyRow {
            key_id: ADMIN_ID.to_string(),
            key_hash: hash_key(ADMIN_SECRET),
            service_name: "bootstrap".to_string(),
            permissions: vec![
                PERM_READ.to_string(),
                PERM_WRITE.to_string(),
                PERM_ADMIN.to_string(),
            ],
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
        })
        .await
        .unwrap();

    let state = ApiState {
        engine: core.engine.clone(),
        store: core.store.clone(),
        metrics: core.metrics.clone(),
        notifications: core.notifications.clone(),
        snapshots: core.snapshots.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let addr = spawn_api_server(bind, state, true, shutdown_rx).await.unwrap();

    (format!("http://{addr}"), shutdown_tx)
}

fn notification_body() -> serde_json::Value {
    serde_json::json!({
        "alert_id": "ext:disk-full",
        "node_id": "p1",
        "level": "warning",
        "title": "Disk Full",
        "message": "90% used",
        "targets": [],
    })
}

#[tokio::test]
async fn test_api_key_lifecycle() {
    let core = core_harness(&[], 300, None).await;
    let (base, _guard) = spawn_api(&core).await;
    let client = reqwest::Client::new();

    // Admin mints a write-only key with a 1h expiry
    let created: serde_json::Value = client
        .post(format!("{base}/api/notifications/api-keys"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .json(&serde_json::json!({
            "service_name": "ingest-bot",
            "permissions": ["notifications:write"],
            "expires_after_secs": 3600,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let key_id = created["key_id"].as_str().unwrap().to_string();
    let key = created["key"].as_str().unwrap().to_string();
    assert!(created["expires_at"].is_string());

    // The plaintext is never stored
    let stored = core.store.get_api_key(&key_id).await.unwrap();
    assert_ne!(stored.key_hash, key);
    assert_eq!(stored.key_hash, hash_key(&key));

    // Write works
    let response = client
        .post(format!("{base}/api/notifications"))
        .header("X-API-Key-ID", &key_id)
        .header("X-API-Key", &key)
        .json(&notification_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // Read is forbidden for a write-only key
    let response = client
        .get(format!("{base}/api/notifications"))
        .header("X-API-Key-ID", &key_id)
        .header("X-API-Key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Wrong secret is rejected
    let response = client
        .post(format!("{base}/api/notifications"))
        .header("X-API-Key-ID", &key_id)
        .header("X-API-Key", "wrong")
        .json(&notification_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Revocation kills the key
    let response = client
        .delete(format!("{base}/api/notifications/api-keys/{key_id}"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = client
        .post(format!("{base}/api/notifications"))
        .header("X-API-Key-ID", &key_id)
        .header("X-API-Key", &key)
        .json(&notification_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_expired_api_key_rejected() {
    let core = core_harness(&[], 300, None).await;
    let (base, _guard) = spawn_api(&core).await;
    let client = reqwest::Client::new();

    core.store
        .create_api_key(&ApiKeyRow {
            key_id: "stale".to_string(),
            key_hash: hash_key("stale-secret"),
            service_name: "old-bot".to_string(),
            permissions: vec![PERM_WRITE.to_string()],
            created_at: Utc::now() - chrono::Duration::hours(2),
            expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
            last_used_at: None,
        })
        .await
        .unwrap();

    let response = client
        .post(format!("{base}/api/notifications"))
        .header("X-API-Key-ID", "stale")
        .header("X-API-Key", "stale-secret")
        .json(&notification_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("expired"));
}

#[tokio::test]
async fn test_missing_api_key_rejected() {
    let core = core_harness(&[], 300, None).await;
    let (base, _guard) = spawn_api(&core).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/api/notifications"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_notification_lifecycle_and_ack_idempotence() {
    let core = core_harness(&[], 300, None).await;
    let (base, _guard) = spawn_api(&core).await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{base}/api/notifications"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .json(&notification_body())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["status"], "pending");

    // Filterable listing
    let listed: Vec<serde_json::Value> = client
        .get(format!("{base}/api/notifications?alert_id=ext:disk-full"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    // First acknowledgement succeeds
    let response = client
        .post(format!("{base}/api/notifications/{id}/acknowledge"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .json(&serde_json::json!({"acknowledged_by": "alice", "comment": "on it"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // The second conflicts
    let response = client
        .post(format!("{base}/api/notifications/{id}/acknowledge"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .json(&serde_json::json!({"acknowledged_by": "bob"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Resolve, then the terminal state refuses another resolve
    let response = client
        .post(format!("{base}/api/notifications/{id}/resolve"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .post(format!("{base}/api/notifications/{id}/resolve"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Delete and 404 afterwards
    let response = client
        .delete(format!("{base}/api/notifications/{id}"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = client
        .get(format!("{base}/api/notifications/{id}"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_callback_requires_valid_signature() {
    // Webhook target with a shared secret, pointed at a sink
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&sink)
        .await;

    let mut webhook = test_webhook(&sink.uri(), 0, 0);
    webhook.secret = Some("cb-secret".to_string());

    let core = core_harness(&[], 300, Some(webhook)).await;
    let (base, _guard) = spawn_api(&core).await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{base}/api/notifications"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .json(&notification_body())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    let body = serde_json::json!({
        "notification_id": id,
        "acknowledged_by": "pagerbot",
    })
    .to_string();

    // Tampered signature is refused
    let response = client
        .post(format!("{base}/api/notifications/callbacks/webhook/ops"))
        .header("X-Signature", sign_payload("wrong-secret", body.as_bytes()))
        .header("Content-Type", "application/json")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Valid signature acknowledges the notification
    let response = client
        .post(format!("{base}/api/notifications/callbacks/webhook/ops"))
        .header("X-Signature", sign_payload("cb-secret", body.as_bytes()))
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let detail: serde_json::Value = client
        .get(format!("{base}/api/notifications/{id}"))
        .header("X-API-Key-ID", ADMIN_ID)
        .header("X-API-Key", ADMIN_SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["status"], "acknowledged");

    // Unknown target type is a 404
    let response = client
        .post(format!("{base}/api/notifications/callbacks/pager/ops"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_read_api_serves_reported_state() {
    let core = core_harness(&["p1"], 300, None).await;
    let (base, _guard) = spawn_api(&core).await;
    let client = reqwest::Client::new();

    // Ingest over the wire
    let response = client
        .post(format!("{base}/api/report"))
        .json(&icmp_report("p1", Utc::now().timestamp()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["received"], true);

    let nodes: Vec<serde_json::Value> = client
        .get(format!("{base}/api/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["node_id"], "p1");
    assert_eq!(nodes[0]["is_healthy"], true);

    let node: serde_json::Value = client
        .get(format!("{base}/api/nodes/p1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(node["services"][0]["service_name"], "icmp-check");

    let points: Vec<serde_json::Value> = client
        .get(format!("{base}/api/nodes/p1/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0]["response_time_ns"], 1234567);

    let history: Vec<serde_json::Value> = client
        .get(format!("{base}/api/nodes/p1/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    let response = client
        .get(format!("{base}/api/nodes/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let status: serde_json::Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["total_nodes"], 1);
    assert_eq!(status["healthy_nodes"], 1);
    assert_eq!(status["metric_nodes"], 1);

    // An empty body is a 400 at the wire, not a crash
    let response = client
        .post(format!("{base}/api/report"))
        .json(&serde_json::json!({"poller_id": "", "timestamp": 0, "services": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
