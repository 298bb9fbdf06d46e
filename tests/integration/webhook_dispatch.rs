//! Webhook dispatcher tests: retry, cooldown bound, signing, templates
//! and delivery bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serviceradar::alerting::{sign_payload, AlertSender, WebhookSender};
use serviceradar::notify::types::{
    NotificationLevel, NotificationRequest, NotificationStatus, TargetSpec, TargetStatus,
    TargetType,
};
use serviceradar::notify::NotificationService;
use serviceradar::store::SqliteStore;
use wiremock::matchers::{header_exists, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::test_webhook;

async fn notify_service(
    webhook: serviceradar::config::WebhookConfig,
) -> (tempfile::TempDir, Arc<SqliteStore>, NotificationService) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("core.db")).await.unwrap());
    let service = NotificationService::new(
        store.clone(),
        vec![Arc::new(WebhookSender::new(webhook))],
    );
    (dir, store, service)
}

fn alert_request(title: &str, node_id: &str) -> NotificationRequest {
    NotificationRequest {
        alert_id: format!("{node_id}:{title}:"),
        node_id: Some(node_id.to_string()),
        service_name: None,
        level: NotificationLevel::Error,
        title: title.to_string(),
        message: format!("{node_id} is down"),
        expire_at: None,
        metadata: HashMap::new(),
        targets: vec![TargetSpec {
            target_type: TargetType::Webhook,
            target_id: "ops".to_string(),
        }],
    }
}

#[tokio::test]
async fn test_retry_until_success() {
    let server = MockServer::start().await;

    // Two failures, then success
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"id":"ext-1","status":"queued"}"#),
        )
        .mount(&server)
        .await;

    let (_dir, store, service) = notify_service(test_webhook(&server.uri(), 0, 2)).await;

    let notification = service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();

    // max_retries = 2 means exactly three attempts on the wire
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    let targets = store.get_notification_targets(notification.id).await.unwrap();
    assert_eq!(targets[0].status, TargetStatus::Sent);
    assert_eq!(targets[0].external_id.as_deref(), Some("ext-1"));
    assert!(targets[0].response_data.as_deref().unwrap().contains("queued"));

    let stored = store.get_notification(notification.id).await.unwrap();
    assert_eq!(stored.status, NotificationStatus::Sent);
}

#[tokio::test]
async fn test_exhausted_retries_capture_last_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let (_dir, store, service) = notify_service(test_webhook(&server.uri(), 0, 1)).await;

    let notification = service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let targets = store.get_notification_targets(notification.id).await.unwrap();
    assert_eq!(targets[0].status, TargetStatus::Failed);
    assert!(targets[0].response_data.as_deref().unwrap().contains("overloaded"));

    // All targets failed: the notification stays pending (retriable)
    let stored = store.get_notification(notification.id).await.unwrap();
    assert_eq!(stored.status, NotificationStatus::Pending);
}

#[tokio::test]
async fn test_cooldown_bounds_dispatch_to_one_per_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (_dir, store, service) = notify_service(test_webhook(&server.uri(), 300, 0)).await;

    let first = service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();
    let second = service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();

    // One wire delivery inside the window
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    let first_targets = store.get_notification_targets(first.id).await.unwrap();
    assert_eq!(first_targets[0].status, TargetStatus::Sent);

    // The suppressed delivery is not a failure; its target stays pending
    let second_targets = store.get_notification_targets(second.id).await.unwrap();
    assert_eq!(second_targets[0].status, TargetStatus::Pending);

    // A different service key for the same node is unaffected
    let mut other = alert_request("Service Failure", "p1");
    other.service_name = Some("ssh".to_string());
    service.create_and_dispatch(other).await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_payload_is_signed_when_secret_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("X-Signature"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut webhook = test_webhook(&server.uri(), 0, 0);
    webhook.secret = Some("s3cret".to_string());

    let (_dir, _store, service) = notify_service(webhook).await;
    service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let signature = requests[0].headers.get("X-Signature").unwrap();
    let expected = sign_payload("s3cret", &requests[0].body);
    assert_eq!(signature.to_str().unwrap(), expected);
}

#[tokio::test]
async fn test_template_rendering_shapes_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut webhook = test_webhook(&server.uri(), 0, 0);
    webhook.template = Some(r#"{"text":"{{title}} on {{node_id}}","payload":{{json}}}"#.to_string());

    let (_dir, _store, service) = notify_service(webhook).await;
    service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();

    assert_eq!(body["text"], "Node Offline on p1");
    assert_eq!(body["payload"]["title"], "Node Offline");
    assert_eq!(body["payload"]["level"], "error");
}

#[tokio::test]
async fn test_disabled_target_is_not_contacted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut webhook = test_webhook(&server.uri(), 0, 0);
    webhook.enabled = false;

    let (_dir, store, service) = notify_service(webhook).await;
    let notification = service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();

    assert!(server.received_requests().await.unwrap().is_empty());

    // Disabled is a non-error: the target stays pending
    let targets = store.get_notification_targets(notification.id).await.unwrap();
    assert_eq!(targets[0].status, TargetStatus::Pending);
}

#[tokio::test]
async fn test_recovery_erases_cooldown_entries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (_dir, _store, service) = notify_service(test_webhook(&server.uri(), 300, 0)).await;

    service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // Suppressed inside the window...
    service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // ...until the recovery path clears the node's entries
    for sender in service.senders() {
        sender.clear_node_cooldowns("p1");
    }

    service
        .create_and_dispatch(alert_request("Node Offline", "p1"))
        .await
        .unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
