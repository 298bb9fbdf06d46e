//! Core state machine.
//!
//! Driven by two inputs, incoming status reports and wall-clock ticks, and
//! owns every decision about health transitions and alerting. The node row
//! and its history point always move together; reports for one poller are
//! serialised behind a per-id lock so the read-decide-write span is
//! linearisable.

pub mod payloads;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};

use crate::alerting::AlertSender;
use crate::api::state::SnapshotStore;
use crate::config::KnownPollers;
use crate::metrics::MetricManager;
use crate::notify::types::{
    NotificationLevel, NotificationRequest, TargetSpec,
};
use crate::notify::NotificationService;
use crate::store::{
    ServiceHistoryRow, ServiceStatusRow, SqliteStore, StoreError, SweepResultRow,
    TimeseriesMetricRow,
};
use crate::{NodeSnapshot, PollerReport, ServiceReport, ServiceSnapshot};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug)]
pub enum EngineError {
    /// Report carried no poller id
    EmptyPollerId,

    /// Store failure; surfaced to the ingest caller
    Database(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::EmptyPollerId => write!(f, "report has empty poller id"),
            EngineError::Database(err) => write!(f, "database error: {}", err),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Database(err)
    }
}

pub struct Engine {
    store: Arc<SqliteStore>,
    metrics: Arc<MetricManager>,
    notifications: NotificationService,
    snapshots: Arc<SnapshotStore>,
    known: KnownPollers,
    alert_threshold: Duration,
    alert_targets: Vec<TargetSpec>,

    /// Per-poller report serialisation
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SqliteStore>,
        metrics: Arc<MetricManager>,
        notifications: NotificationService,
        snapshots: Arc<SnapshotStore>,
        known: KnownPollers,
        alert_threshold: std::time::Duration,
        alert_targets: Vec<TargetSpec>,
    ) -> Self {
        Self {
            store,
            metrics,
            notifications,
            snapshots,
            known,
            alert_threshold: Duration::from_std(alert_threshold)
                .unwrap_or_else(|_| Duration::seconds(300)),
            alert_targets,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn poller_lock(&self, poller_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(poller_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn accepts(&self, poller_id: &str) -> bool {
        // An empty pattern list accepts every poller
        self.known.is_empty() || self.known.matches(poller_id)
    }

    // ========================================================================
    // Ingest path
    // ========================================================================

    /// Process one status report.
    ///
    /// Reports from unknown pollers are logged and acknowledged without
    /// touching any state, so a misconfigured fleet cannot pollute the
    /// node table.
    #[instrument(skip(self, report), fields(poller_id = %report.poller_id))]
    pub async fn handle_report(&self, report: &PollerReport) -> EngineResult<()> {
        if report.poller_id.is_empty() {
            return Err(EngineError::EmptyPollerId);
        }

        if !self.accepts(&report.poller_id) {
            warn!("ignoring report from unknown poller {}", report.poller_id);
            return Ok(());
        }

        let lock = self.poller_lock(&report.poller_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let report_time = DateTime::from_timestamp(report.timestamp, 0).unwrap_or(now);

        // A pre-registered node that has never reported counts as first
        // contact, not as a recovery candidate
        let (was_healthy, had_reported) = match self.store.get_node(&report.poller_id).await {
            Ok(node) => (node.is_healthy, node.last_seen.is_some()),
            Err(e) if e.is_not_found() => (false, false),
            Err(e) => return Err(e.into()),
        };

        let is_healthy = report.services.iter().all(|s| s.available);

        // Node row (and its history point) first: service rows reference it
        self.store
            .update_node_status(&report.poller_id, is_healthy, report_time)
            .await?;

        let mut snapshot_services = Vec::with_capacity(report.services.len());
        for service in &report.services {
            let details = self.process_service(&report.poller_id, service, now).await?;
            snapshot_services.push(ServiceSnapshot {
                service_name: service.service_name.clone(),
                service_type: service.service_type.clone(),
                available: service.available,
                details: serde_json::from_str(&details).ok(),
                timestamp: now,
            });
        }

        if had_reported && !was_healthy && is_healthy {
            info!("node {} recovered", report.poller_id);
            self.fire_node_recovered(&report.poller_id).await;
        }

        let node = self.store.get_node(&report.poller_id).await?;
        self.snapshots
            .publish(NodeSnapshot {
                node_id: report.poller_id.clone(),
                is_healthy,
                first_seen: Some(node.first_seen),
                last_seen: node.last_seen,
                services: snapshot_services,
            })
            .await;

        Ok(())
    }

    /// Persist one service entry and run its type-specific handling.
    /// Returns the details string actually stored (sweep payloads may be
    /// repaired). Malformed special payloads are logged per service; the
    /// rest of the report continues.
    async fn process_service(
        &self,
        poller_id: &str,
        service: &ServiceReport,
        now: DateTime<Utc>,
    ) -> EngineResult<String> {
        let mut details = service.message.clone();

        match service.service_type.as_str() {
            "icmp" => match payloads::parse_icmp(&service.message) {
                Ok(icmp) => {
                    self.metrics.add_metric(
                        poller_id,
                        now,
                        icmp.response_time,
                        &service.service_name,
                    );
                }
                Err(e) => {
                    warn!(
                        "invalid icmp payload from {}/{}: {}",
                        poller_id, service.service_name, e
                    );
                }
            },

            "snmp" => match payloads::parse_snmp(&service.message) {
                Ok(targets) => {
                    for (target_name, target) in &targets {
                        for (oid_name, oid) in &target.oid_status {
                            let metadata = serde_json::json!({
                                "target_name": target_name,
                                "last_poll": target.last_poll,
                            })
                            .to_string();

                            self.store
                                .insert_timeseries_metric(&TimeseriesMetricRow {
                                    node_id: poller_id.to_string(),
                                    metric_name: oid_name.clone(),
                                    metric_type: "snmp".to_string(),
                                    value: oid.value_string(),
                                    metadata,
                                    timestamp: now,
                                })
                                .await?;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "invalid snmp payload from {}/{}: {}",
                        poller_id, service.service_name, e
                    );
                }
            },

            "sweep" => match payloads::repair_sweep(&service.message, now) {
                Ok((repaired, sweep)) => {
                    details = repaired;
                    self.store
                        .insert_sweep_result(&SweepResultRow {
                            node_id: poller_id.to_string(),
                            network: sweep.network,
                            total_hosts: sweep.total_hosts,
                            available_hosts: sweep.available_hosts,
                            last_sweep: sweep.last_sweep,
                            timestamp: now,
                        })
                        .await?;
                }
                Err(e) => {
                    warn!(
                        "invalid sweep payload from {}/{}: {}",
                        poller_id, service.service_name, e
                    );
                }
            },

            _ => {}
        }

        let prev = self
            .store
            .get_prev_availability(poller_id, &service.service_name)
            .await?;

        self.store
            .insert_service_status(&ServiceStatusRow {
                node_id: poller_id.to_string(),
                service_name: service.service_name.clone(),
                service_type: service.service_type.clone(),
                available: service.available,
                details: details.clone(),
                timestamp: now,
            })
            .await?;

        if prev != Some(service.available) {
            self.store
                .insert_service_history(&ServiceHistoryRow {
                    node_id: poller_id.to_string(),
                    service_name: service.service_name.clone(),
                    available: service.available,
                    timestamp: now,
                })
                .await?;

            match (prev, service.available) {
                (Some(true), false) => {
                    self.fire_alert(
                        NotificationLevel::Warning,
                        "Service Failure",
                        format!(
                            "service {} on node {} is unavailable",
                            service.service_name, poller_id
                        ),
                        Some(poller_id),
                        Some(&service.service_name),
                        HashMap::new(),
                    )
                    .await;
                }
                (Some(false), true) => {
                    self.clear_cooldowns(poller_id);
                    self.fire_alert(
                        NotificationLevel::Info,
                        "Service Recovered",
                        format!(
                            "service {} on node {} is available again",
                            service.service_name, poller_id
                        ),
                        Some(poller_id),
                        Some(&service.service_name),
                        HashMap::new(),
                    )
                    .await;
                }
                // First sighting of this service: history only
                _ => {}
            }
        }

        Ok(details)
    }

    // ========================================================================
    // Monitor tick
    // ========================================================================

    /// Wall-clock health pass over every known node.
    pub async fn check_health(&self) {
        let now = Utc::now();

        let nodes = match self.store.get_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("health check failed to list nodes: {}", e);
                return;
            }
        };

        for node in nodes {
            if !self.accepts(&node.node_id) {
                continue;
            }

            // Never-reported nodes are handled by their own pass
            let Some(last_seen) = node.last_seen else {
                continue;
            };

            let stale = last_seen < now - self.alert_threshold;

            if node.is_healthy && stale {
                self.mark_node_down(&node.node_id, last_seen, now).await;
            } else if !node.is_healthy && !stale {
                self.handle_potential_recovery(&node.node_id, last_seen).await;
            }
        }
    }

    async fn mark_node_down(&self, node_id: &str, last_seen: DateTime<Utc>, now: DateTime<Utc>) {
        let lock = self.poller_lock(node_id);
        let _guard = lock.lock().await;

        // Re-check under the lock: a report may have just arrived
        match self.store.get_node(node_id).await {
            Ok(node) if node.is_healthy => {}
            _ => return,
        }

        info!("node {} is offline (last seen {})", node_id, last_seen);

        if let Err(e) = self.store.update_node_status(node_id, false, last_seen).await {
            error!("failed to mark {} down: {}", node_id, e);
            return;
        }

        self.snapshots.set_health(node_id, false).await;

        let duration = (now - last_seen).num_seconds();
        let mut metadata = HashMap::new();
        metadata.insert(
            "duration".to_string(),
            serde_json::Value::String(format!("{duration}s")),
        );

        self.fire_alert(
            NotificationLevel::Error,
            "Node Offline",
            format!("node {node_id} has not reported for {duration}s"),
            Some(node_id),
            None,
            metadata,
        )
        .await;
    }

    /// Safety net for the down→up path: the persisted health says
    /// unhealthy but reports are arriving. Only fires when the latest
    /// stored service statuses are all available, and flips the persisted
    /// health in the same pass so it cannot fire twice or race the
    /// ingest-path recovery.
    async fn handle_potential_recovery(&self, node_id: &str, last_seen: DateTime<Utc>) {
        let lock = self.poller_lock(node_id);
        let _guard = lock.lock().await;

        match self.store.get_node(node_id).await {
            Ok(node) if !node.is_healthy => {}
            _ => return,
        }

        let statuses = match self.store.get_latest_service_statuses(node_id).await {
            Ok(statuses) => statuses,
            Err(e) => {
                error!("recovery check failed for {}: {}", node_id, e);
                return;
            }
        };

        if statuses.is_empty() || !statuses.iter().all(|s| s.available) {
            return;
        }

        info!("node {} recovered (monitor pass)", node_id);

        if let Err(e) = self.store.update_node_status(node_id, true, last_seen).await {
            error!("failed to mark {} recovered: {}", node_id, e);
            return;
        }

        self.snapshots.set_health(node_id, true).await;
        self.fire_node_recovered(node_id).await;
    }

    // ========================================================================
    // Never-reported pass
    // ========================================================================

    /// One grouped warning naming every node that has a row but has never
    /// sent a report.
    pub async fn check_never_reported(&self) {
        let silent = match self.store.find_never_reported().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("never-reported check failed: {}", e);
                return;
            }
        };

        if silent.is_empty() {
            return;
        }

        warn!("{} poller(s) have never reported: {:?}", silent.len(), silent);

        let mut metadata = HashMap::new();
        metadata.insert(
            "pollers".to_string(),
            serde_json::Value::from(silent.clone()),
        );

        self.fire_alert(
            NotificationLevel::Warning,
            "Pollers Never Reported",
            format!("never heard from: {}", silent.join(", ")),
            None,
            None,
            metadata,
        )
        .await;
    }

    // ========================================================================
    // Alerts
    // ========================================================================

    /// Erase dispatcher cooldown entries for a node so the following
    /// recovery alert is never suppressed by the preceding down alert.
    fn clear_cooldowns(&self, node_id: &str) {
        for sender in self.notifications.senders() {
            sender.clear_node_cooldowns(node_id);
        }
    }

    async fn fire_node_recovered(&self, node_id: &str) {
        self.clear_cooldowns(node_id);

        self.fire_alert(
            NotificationLevel::Info,
            "Node Recovered",
            format!("node {node_id} is reporting again"),
            Some(node_id),
            None,
            HashMap::new(),
        )
        .await;
    }

    async fn fire_alert(
        &self,
        level: NotificationLevel,
        title: &str,
        message: String,
        node_id: Option<&str>,
        service_name: Option<&str>,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        if self.alert_targets.is_empty() {
            debug!("no alert targets configured, skipping {title:?}");
            return;
        }

        let request = NotificationRequest {
            alert_id: format!(
                "{}:{}:{}",
                node_id.unwrap_or("core"),
                title,
                service_name.unwrap_or("")
            ),
            node_id: node_id.map(str::to_string),
            service_name: service_name.map(str::to_string),
            level,
            title: title.to_string(),
            message,
            expire_at: None,
            metadata,
            targets: self.alert_targets.clone(),
        };

        if let Err(e) = self.notifications.create(request).await {
            error!("failed to create {title:?} notification: {}", e);
        }
    }
}
