//! State-machine transition tests: offline detection, recovery, cooldown
//! clearing and the never-reported pass.

use chrono::Utc;
use pretty_assertions::assert_eq;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::helpers::*;

async fn alert_titles(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|request: &Request| {
            serde_json::from_slice::<serde_json::Value>(&request.body)
                .ok()
                .and_then(|v| v["title"].as_str().map(str::to_string))
        })
        .collect()
}

async fn mock_sink() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_monitor_tick_marks_stale_node_offline() {
    let sink = mock_sink().await;
    let core = core_harness(&["p1"], 60, Some(test_webhook(&sink.uri(), 300, 0))).await;

    // Healthy report 120s ago, threshold 60s
    let t0 = Utc::now().timestamp() - 120;
    core.engine.handle_report(&icmp_report("p1", t0)).await.unwrap();
    assert!(core.store.get_node("p1").await.unwrap().is_healthy);

    core.engine.check_health().await;

    let node = core.store.get_node("p1").await.unwrap();
    assert!(!node.is_healthy);
    // last_seen is preserved by the offline transition
    assert_eq!(node.last_seen.unwrap().timestamp(), t0);

    let history = core.store.get_node_history("p1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[0].is_healthy);

    assert!(!core.snapshots.get("p1").await.unwrap().is_healthy);

    wait_for_requests(&sink, 1, "offline alert").await;

    let requests = sink.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["title"], "Node Offline");
    assert_eq!(body["level"], "error");
    assert_eq!(body["node_id"], "p1");
    // ~120s of silence reported in the alert details
    let duration = body["metadata"]["duration"].as_str().unwrap();
    let seconds: i64 = duration.trim_end_matches('s').parse().unwrap();
    assert!((118..=125).contains(&seconds), "duration was {duration}");
}

#[tokio::test]
async fn test_recovery_clears_cooldown_for_next_offline_alert() {
    let sink = mock_sink().await;
    // Cooldown 5 minutes, threshold 60s
    let core = core_harness(&["p1"], 60, Some(test_webhook(&sink.uri(), 300, 0))).await;

    // Down...
    core.engine
        .handle_report(&icmp_report("p1", Utc::now().timestamp() - 120))
        .await
        .unwrap();
    core.engine.check_health().await;
    wait_for_requests(&sink, 1, "first offline alert").await;

    // ...up again: the recovery path erases the node's cooldown entries
    core.engine
        .handle_report(&icmp_report("p1", Utc::now().timestamp()))
        .await
        .unwrap();
    assert!(core.store.get_node("p1").await.unwrap().is_healthy);
    wait_for_requests(&sink, 2, "recovery alert").await;

    // ...and down once more, well inside the 5-minute cooldown window.
    // Only the cooldown clear makes this third alert deliverable.
    core.engine
        .handle_report(&icmp_report("p1", Utc::now().timestamp() - 120))
        .await
        .unwrap();
    core.engine.check_health().await;
    wait_for_requests(&sink, 3, "second offline alert").await;

    assert_eq!(
        alert_titles(&sink).await,
        vec!["Node Offline", "Node Recovered", "Node Offline"]
    );
}

#[tokio::test]
async fn test_ingest_recovery_fires_single_node_alert() {
    let sink = mock_sink().await;
    let core = core_harness(&["p1"], 60, Some(test_webhook(&sink.uri(), 300, 0))).await;
    let t = Utc::now().timestamp();

    // First contact with a failing service: no alert of any kind
    core.engine
        .handle_report(&report("p1", t, vec![service("ssh", "port", false, "")]))
        .await
        .unwrap();
    assert!(!core.store.get_node("p1").await.unwrap().is_healthy);

    // All services back: one node recovery (plus the service-level one)
    core.engine
        .handle_report(&report("p1", t + 1, vec![service("ssh", "port", true, "")]))
        .await
        .unwrap();
    wait_for_requests(&sink, 2, "recovery alerts").await;

    // The monitor tick must not duplicate the recovery the ingest path
    // already fired
    core.engine.check_health().await;
    core.engine.check_health().await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let titles = alert_titles(&sink).await;
    let node_recoveries = titles.iter().filter(|t| *t == "Node Recovered").count();
    let service_recoveries = titles.iter().filter(|t| *t == "Service Recovered").count();
    assert_eq!(node_recoveries, 1);
    assert_eq!(service_recoveries, 1);
    assert_eq!(titles.len(), 2);
}

#[tokio::test]
async fn test_monitor_tick_recovery_safety_net() {
    let sink = mock_sink().await;
    let core = core_harness(&["p1"], 600, Some(test_webhook(&sink.uri(), 300, 0))).await;
    let t = Utc::now().timestamp();

    // Unhealthy node with a fresh last_seen
    core.engine
        .handle_report(&report("p1", t, vec![service("ssh", "port", false, "")]))
        .await
        .unwrap();

    // Latest stored status is still unavailable: the safety net must hold
    core.engine.check_health().await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(alert_titles(&sink).await.is_empty());
    assert!(!core.store.get_node("p1").await.unwrap().is_healthy);

    // Simulate the crash window: services recovered in the store while the
    // node row still says unhealthy
    core.store
        .insert_service_status(&serviceradar::store::ServiceStatusRow {
            node_id: "p1".to_string(),
            service_name: "ssh".to_string(),
            service_type: "port".to_string(),
            available: true,
            details: String::new(),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    core.engine.check_health().await;

    let node = core.store.get_node("p1").await.unwrap();
    assert!(node.is_healthy);
    let history = core.store.get_node_history("p1", 1).await.unwrap();
    assert!(history[0].is_healthy);

    wait_for_requests(&sink, 1, "safety-net recovery alert").await;

    // Idempotent: the next pass sees a healthy node and does nothing
    core.engine.check_health().await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(alert_titles(&sink).await, vec!["Node Recovered"]);
}

#[tokio::test]
async fn test_never_reported_pass_groups_all_silent_pollers() {
    let sink = mock_sink().await;
    let core =
        core_harness(&["pa", "pb", "pc"], 300, Some(test_webhook(&sink.uri(), 300, 0))).await;

    core.store
        .ensure_known_pollers(
            &["pa".to_string(), "pb".to_string(), "pc".to_string()],
            Utc::now(),
        )
        .await
        .unwrap();

    // One of the three makes contact
    core.engine
        .handle_report(&icmp_report("pb", Utc::now().timestamp()))
        .await
        .unwrap();

    core.engine.check_never_reported().await;

    wait_for_requests(&sink, 1, "never-reported warning").await;

    let requests = sink.received_requests().await.unwrap();
    let warning = requests
        .iter()
        .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
        .find(|v| v["title"] == "Pollers Never Reported")
        .expect("grouped warning present");

    assert_eq!(warning["level"], "warning");
    let message = warning["message"].as_str().unwrap();
    assert!(message.contains("pa"));
    assert!(message.contains("pc"));
    assert!(!message.contains("pb"));

    // One grouped warning, not one per poller
    assert_eq!(alert_titles(&sink).await.len(), 1);
}
