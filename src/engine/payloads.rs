//! Decoders for the structured `details` payloads the core recognises.
//!
//! `service_status.details` is an opaque byte string; these decoders give
//! the three special-cased service types (`icmp`, `snmp`, `sweep`) a typed
//! view. Unknown types fall through to opaque and skip derived-metric
//! extraction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sweep timestamps further than this past `now` are considered bogus
const MAX_SWEEP_SKEW_SECS: i64 = 24 * 60 * 60;

/// ICMP checker payload: round-trip latency for one probed host.
#[derive(Debug, Clone, Deserialize)]
pub struct IcmpDetails {
    #[serde(default)]
    pub host: Option<String>,

    /// Round-trip time in nanoseconds
    pub response_time: i64,

    #[serde(default)]
    pub packet_loss: f64,

    #[serde(default)]
    pub available: bool,
}

/// SNMP checker payload: per-target OID snapshots.
pub type SnmpDetails = HashMap<String, SnmpTargetStatus>;

#[derive(Debug, Clone, Deserialize)]
pub struct SnmpTargetStatus {
    #[serde(default)]
    pub available: bool,

    #[serde(default)]
    pub last_poll: Option<serde_json::Value>,

    #[serde(default)]
    pub oid_status: HashMap<String, OidStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OidStatus {
    pub last_value: serde_json::Value,

    #[serde(default)]
    pub last_update: Option<serde_json::Value>,

    #[serde(default)]
    pub error_count: i64,

    #[serde(default)]
    pub last_error: Option<String>,
}

impl OidStatus {
    /// Stringified sample value as stored in the time-series table.
    pub fn value_string(&self) -> String {
        match &self.last_value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Network-sweep summary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepDetails {
    pub network: String,
    pub total_hosts: i64,
    pub available_hosts: i64,

    /// Unix seconds of the last sweep; repaired on ingest when absent or
    /// impossibly far in the future
    #[serde(default)]
    pub last_sweep: i64,
}

pub fn parse_icmp(message: &str) -> Result<IcmpDetails, serde_json::Error> {
    serde_json::from_str(message)
}

pub fn parse_snmp(message: &str) -> Result<SnmpDetails, serde_json::Error> {
    serde_json::from_str(message)
}

/// Parse a sweep payload and repair its `last_sweep` field.
///
/// A missing timestamp, or one more than a day past `now`, is overwritten
/// with `now`; every other field of the raw message is preserved verbatim
/// in the re-serialised output.
pub fn repair_sweep(
    message: &str,
    now: DateTime<Utc>,
) -> Result<(String, SweepDetails), serde_json::Error> {
    let mut raw: serde_json::Value = serde_json::from_str(message)?;

    let needs_repair = match raw.get("last_sweep").and_then(|v| v.as_i64()) {
        None => true,
        Some(last_sweep) => last_sweep > now.timestamp() + MAX_SWEEP_SKEW_SECS,
    };

    if needs_repair {
        if let Some(object) = raw.as_object_mut() {
            object.insert(
                "last_sweep".to_string(),
                serde_json::Value::from(now.timestamp()),
            );
        }
    }

    let details: SweepDetails = serde_json::from_value(raw.clone())?;
    Ok((raw.to_string(), details))
}
