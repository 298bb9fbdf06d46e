//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use serviceradar::alerting::{AlertSender, WebhookSender};
use serviceradar::api::SnapshotStore;
use serviceradar::config::{KnownPollers, MetricsConfig, WebhookConfig};
use serviceradar::engine::Engine;
use serviceradar::metrics::MetricManager;
use serviceradar::notify::types::{TargetSpec, TargetType};
use serviceradar::notify::NotificationService;
use serviceradar::store::SqliteStore;
use serviceradar::{PollerReport, ServiceReport};

pub struct CoreHarness {
    // Held so the database file outlives the test
    _dir: tempfile::TempDir,
    pub store: Arc<SqliteStore>,
    pub metrics: Arc<MetricManager>,
    pub notifications: NotificationService,
    pub snapshots: Arc<SnapshotStore>,
    pub engine: Arc<Engine>,
}

/// Build a full core wired to a temp database, with an optional webhook
/// alert target.
pub async fn core_harness(
    known: &[&str],
    alert_threshold_secs: u64,
    webhook: Option<WebhookConfig>,
) -> CoreHarness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("core.db")).await.unwrap());

    let metrics = Arc::new(MetricManager::new(&MetricsConfig {
        enabled: true,
        retention: 100,
        max_nodes: 1000,
    }));

    let mut senders: Vec<Arc<dyn AlertSender>> = Vec::new();
    let mut targets = Vec::new();
    if let Some(webhook) = webhook {
        targets.push(TargetSpec {
            target_type: TargetType::Webhook,
            target_id: webhook.name.clone(),
        });
        senders.push(Arc::new(WebhookSender::new(webhook)));
    }

    let notifications = NotificationService::new(store.clone(), senders);
    let snapshots = Arc::new(SnapshotStore::new());

    let known = KnownPollers::compile(
        &known.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
    )
    .unwrap();

    let engine = Arc::new(Engine::new(
        store.clone(),
        metrics.clone(),
        notifications.clone(),
        snapshots.clone(),
        known,
        Duration::from_secs(alert_threshold_secs),
        targets,
    ));

    CoreHarness {
        _dir: dir,
        store,
        metrics,
        notifications,
        snapshots,
        engine,
    }
}

pub fn test_webhook(uri: &str, cooldown_secs: u64, max_retries: u32) -> WebhookConfig {
    WebhookConfig {
        enabled: true,
        name: "ops".to_string(),
        url: uri.to_string(),
        cooldown_secs,
        template: None,
        secret: None,
        signature_header: "X-Signature".to_string(),
        headers: Default::default(),
        max_retries,
        retry_delay_ms: 10,
        timeout_secs: 2,
    }
}

pub fn service(name: &str, service_type: &str, available: bool, message: &str) -> ServiceReport {
    ServiceReport {
        service_name: name.to_string(),
        service_type: service_type.to_string(),
        available,
        message: message.to_string(),
    }
}

pub fn report(poller_id: &str, timestamp: i64, services: Vec<ServiceReport>) -> PollerReport {
    PollerReport {
        poller_id: poller_id.to_string(),
        timestamp,
        services,
    }
}

pub fn icmp_report(poller_id: &str, timestamp: i64) -> PollerReport {
    report(
        poller_id,
        timestamp,
        vec![service(
            "icmp-check",
            "icmp",
            true,
            r#"{"response_time":1234567,"packet_loss":0,"available":true}"#,
        )],
    )
}

/// Poll until the mock server has seen at least `count` requests. Alert
/// fan-out runs on background tasks, so tests wait rather than sleep a
/// fixed amount.
pub async fn wait_for_requests(server: &wiremock::MockServer, count: usize, what: &str) {
    for _ in 0..100 {
        let seen = server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0);
        if seen >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
