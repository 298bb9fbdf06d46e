//! Row definitions for the core database.
//!
//! Aggregate health lives in typed columns; service detail payloads stay
//! opaque JSON so checker formats can evolve without migrations. The
//! notification-side rows live in [`crate::notify::types`] since they are
//! shared with the dispatchers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One monitored node (poller) and its current aggregate health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRow {
    pub node_id: String,
    pub first_seen: DateTime<Utc>,

    /// `None` for a pre-registered node that has never reported
    pub last_seen: Option<DateTime<Utc>>,

    pub is_healthy: bool,
}

/// Immutable health-transition point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHistoryRow {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_healthy: bool,
}

/// One reported service state at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusRow {
    pub node_id: String,
    pub service_name: String,
    pub service_type: String,
    pub available: bool,

    /// Opaque payload, conventionally JSON
    pub details: String,

    pub timestamp: DateTime<Utc>,
}

/// Availability-transition point for a single service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHistoryRow {
    pub node_id: String,
    pub service_name: String,
    pub available: bool,
    pub timestamp: DateTime<Utc>,
}

/// Parsed network-sweep summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResultRow {
    pub node_id: String,
    pub network: String,
    pub total_hosts: i64,
    pub available_hosts: i64,
    pub last_sweep: i64,
    pub timestamp: DateTime<Utc>,
}

/// Generic time-series sample (SNMP OID values land here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeseriesMetricRow {
    pub node_id: String,
    pub metric_name: String,
    pub metric_type: String,
    pub value: String,

    /// Source context, e.g. `{"target_name": ..., "last_poll": ...}`
    pub metadata: String,

    pub timestamp: DateTime<Utc>,
}

/// A stored API key. Only the SHA-256 hash of the secret is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRow {
    pub key_id: String,
    pub key_hash: String,
    pub service_name: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRow {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}
