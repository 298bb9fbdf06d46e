pub mod alerting;
pub mod api;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One rolled-up status report from a poller.
///
/// This is the ingest wire payload: `timestamp` is unix seconds as reported
/// by the poller, `services` carries one entry per probed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerReport {
    pub poller_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub services: Vec<ServiceReport>,
}

/// A single service entry inside a [`PollerReport`].
///
/// `message` is an opaque payload, conventionally JSON; the core only
/// interprets it for the `icmp`, `snmp` and `sweep` service types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceReport {
    pub service_name: String,
    pub service_type: String,
    pub available: bool,
    #[serde(default)]
    pub message: String,
}

/// Response to a status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub received: bool,
}

/// Snapshot of one node's state as served by the read API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub is_healthy: bool,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub services: Vec<ServiceSnapshot>,
}

/// Per-service slice of a [`NodeSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service_name: String,
    pub service_type: String,
    pub available: bool,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}
