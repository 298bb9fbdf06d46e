//! Ingest-path tests: first contact, payload handling, known-poller
//! filtering and the node/history consistency invariant.

use chrono::Utc;
use pretty_assertions::assert_eq;
use serviceradar::engine::EngineError;

use crate::helpers::*;

#[tokio::test]
async fn test_first_report_creates_node_history_service_and_metric() {
    let core = core_harness(&["p1"], 300, None).await;
    let t = Utc::now().timestamp();

    core.engine.handle_report(&icmp_report("p1", t)).await.unwrap();

    let node = core.store.get_node("p1").await.unwrap();
    assert!(node.is_healthy);
    assert_eq!(node.first_seen.timestamp(), t);
    assert_eq!(node.last_seen.unwrap().timestamp(), t);

    let history = core.store.get_node_history("p1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_healthy);

    let services = core.store.get_latest_service_statuses("p1").await.unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].service_name, "icmp-check");
    assert!(services[0].available);

    let points = core.metrics.get_metrics("p1");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].response_time_ns, 1234567);

    let snapshot = core.snapshots.get("p1").await.unwrap();
    assert!(snapshot.is_healthy);
    assert_eq!(snapshot.services.len(), 1);
}

#[tokio::test]
async fn test_unknown_poller_leaves_store_untouched() {
    let core = core_harness(&["edge-*"], 300, None).await;

    core.engine
        .handle_report(&icmp_report("rogue", Utc::now().timestamp()))
        .await
        .unwrap();

    assert!(core.store.get_nodes().await.unwrap().is_empty());
    assert!(core.snapshots.get("rogue").await.is_none());
    assert!(core.metrics.get_metrics("rogue").is_empty());
}

#[tokio::test]
async fn test_empty_poller_id_rejected() {
    let core = core_harness(&[], 300, None).await;

    let err = core
        .engine
        .handle_report(&icmp_report("", Utc::now().timestamp()))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::EmptyPollerId));
    assert!(core.store.get_nodes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_node_health_always_matches_latest_history() {
    let core = core_harness(&["p1"], 300, None).await;
    let t = Utc::now().timestamp();

    let reports = [
        vec![service("ssh", "port", true, "")],
        vec![service("ssh", "port", false, "")],
        vec![service("ssh", "port", true, "")],
        vec![
            service("ssh", "port", true, ""),
            service("dns", "port", false, ""),
        ],
    ];

    for (n, services) in reports.into_iter().enumerate() {
        core.engine
            .handle_report(&report("p1", t + n as i64, services))
            .await
            .unwrap();

        let node = core.store.get_node("p1").await.unwrap();
        let history = core.store.get_node_history("p1", 1).await.unwrap();
        assert_eq!(node.is_healthy, history[0].is_healthy);
    }

    // Aggregate is the AND over all services
    assert!(!core.store.get_node("p1").await.unwrap().is_healthy);
}

#[tokio::test]
async fn test_sweep_timestamp_repair() {
    let core = core_harness(&["p1"], 300, None).await;
    let now = Utc::now();

    // 2100-01-01, impossibly far in the future
    let message =
        r#"{"network":"10.0.0.0/8","total_hosts":10,"available_hosts":5,"last_sweep":4102444800}"#;

    core.engine
        .handle_report(&report(
            "p1",
            now.timestamp(),
            vec![service("sweep-lan", "sweep", true, message)],
        ))
        .await
        .unwrap();

    let services = core.store.get_latest_service_statuses("p1").await.unwrap();
    let details = services[0].details.clone();
    let value: serde_json::Value = serde_json::from_str(&details).unwrap();

    let last_sweep = value["last_sweep"].as_i64().unwrap();
    assert!((last_sweep - now.timestamp()).abs() <= 2);
    assert_eq!(value["network"], "10.0.0.0/8");
    assert_eq!(value["total_hosts"], 10);
    assert_eq!(value["available_hosts"], 5);
}

#[tokio::test]
async fn test_snmp_oids_become_timeseries_rows() {
    let core = core_harness(&["p1"], 300, None).await;

    let message = r#"{
        "router-1": {
            "available": true,
            "last_poll": "2025-01-01T00:00:00Z",
            "oid_status": {
                "ifInOctets": {"last_value": 912882, "error_count": 0},
                "sysName": {"last_value": "core-rtr"}
            }
        }
    }"#;

    core.engine
        .handle_report(&report(
            "p1",
            Utc::now().timestamp(),
            vec![service("snmp-check", "snmp", true, message)],
        ))
        .await
        .unwrap();

    let mut rows = core.store.get_timeseries_metrics("p1", 10).await.unwrap();
    rows.sort_by(|a, b| a.metric_name.cmp(&b.metric_name));

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].metric_name, "ifInOctets");
    assert_eq!(rows[0].metric_type, "snmp");
    assert_eq!(rows[0].value, "912882");
    assert!(rows[0].metadata.contains("router-1"));
    assert_eq!(rows[1].value, "core-rtr");
}

#[tokio::test]
async fn test_malformed_special_payload_does_not_fail_report() {
    let core = core_harness(&["p1"], 300, None).await;

    core.engine
        .handle_report(&report(
            "p1",
            Utc::now().timestamp(),
            vec![
                service("icmp-check", "icmp", true, "not json"),
                service("ssh", "port", true, ""),
            ],
        ))
        .await
        .unwrap();

    // Both service rows persisted, no derived metric for the bad payload
    let services = core.store.get_latest_service_statuses("p1").await.unwrap();
    assert_eq!(services.len(), 2);
    assert!(core.metrics.get_metrics("p1").is_empty());
}

#[tokio::test]
async fn test_service_history_tracks_transitions() {
    let core = core_harness(&["p1"], 300, None).await;
    let t = Utc::now().timestamp();

    for (n, available) in [true, true, false, true].into_iter().enumerate() {
        core.engine
            .handle_report(&report(
                "p1",
                t + n as i64,
                vec![service("ssh", "port", available, "")],
            ))
            .await
            .unwrap();
    }

    // Four reports, three distinct states: up (first sighting), down, up
    let history = core
        .store
        .get_service_history("p1", "ssh", 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert!(history[0].available);
    assert!(!history[1].available);
    assert!(history[2].available);
}
