//! SQLite store implementation.
//!
//! WAL mode keeps readers concurrent with the single ingest writer;
//! a busy timeout absorbs lock contention between the scheduler loops
//! and the report handlers.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::error::{StoreError, StoreResult};
use super::schema::{
    ApiKeyRow, NodeHistoryRow, NodeRow, ServiceHistoryRow, ServiceStatusRow, SweepResultRow,
    TimeseriesMetricRow,
};
use crate::config::KnownPollers;
use crate::notify::types::{
    AckMethod, Notification, NotificationFilter, NotificationLevel, NotificationRequest,
    NotificationStatus, NotificationTarget, TargetStatus, TargetType,
};

/// Default and hard cap for history queries
pub const HISTORY_LIMIT: usize = 1000;

/// Default page size for notification listings
const DEFAULT_LIST_LIMIT: usize = 100;

/// Hard cap for notification listings
const MAX_LIST_LIMIT: usize = 1000;

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the core database and run migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing core database at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

        info!("database ready");

        Ok(Self { pool })
    }

    fn millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    // ========================================================================
    // Nodes & history
    // ========================================================================

    /// Upsert the node's aggregate health and append a history point, both
    /// inside one transaction.
    #[instrument(skip(self))]
    pub async fn update_node_status(
        &self,
        node_id: &str,
        is_healthy: bool,
        last_seen: DateTime<Utc>,
    ) -> StoreResult<()> {
        let ts = Self::millis(&last_seen);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO nodes (node_id, first_seen, last_seen, is_healthy)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (node_id) DO UPDATE SET
                last_seen = excluded.last_seen,
                is_healthy = excluded.is_healthy
            "#,
        )
        .bind(node_id)
        .bind(ts)
        .bind(ts)
        .bind(is_healthy)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO node_history (node_id, timestamp, is_healthy) VALUES (?, ?, ?)")
            .bind(node_id)
            .bind(ts)
            .bind(is_healthy)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_node(&self, node_id: &str) -> StoreResult<NodeRow> {
        let row = sqlx::query(
            "SELECT node_id, first_seen, last_seen, is_healthy FROM nodes WHERE node_id = ?",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("node {node_id}")))?;

        Ok(Self::node_from_row(&row))
    }

    pub async fn get_nodes(&self) -> StoreResult<Vec<NodeRow>> {
        let rows = sqlx::query(
            "SELECT node_id, first_seen, last_seen, is_healthy FROM nodes ORDER BY node_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::node_from_row).collect())
    }

    fn node_from_row(row: &sqlx::sqlite::SqliteRow) -> NodeRow {
        NodeRow {
            node_id: row.get("node_id"),
            first_seen: Self::from_millis(row.get("first_seen")),
            last_seen: row
                .get::<Option<i64>, _>("last_seen")
                .map(Self::from_millis),
            is_healthy: row.get("is_healthy"),
        }
    }

    /// Pre-register exact known-poller ids so the never-reported detector
    /// can name them. Existing rows are left untouched.
    pub async fn ensure_known_pollers(
        &self,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let ts = Self::millis(&now);

        for id in ids {
            sqlx::query(
                "INSERT OR IGNORE INTO nodes (node_id, first_seen, last_seen, is_healthy) \
                 VALUES (?, ?, NULL, 0)",
            )
            .bind(id)
            .bind(ts)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Node ids that have a row but have never sent a report.
    pub async fn find_never_reported(&self) -> StoreResult<Vec<String>> {
        let rows =
            sqlx::query("SELECT node_id FROM nodes WHERE last_seen IS NULL ORDER BY node_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.iter().map(|row| row.get("node_id")).collect())
    }

    /// History points for one node, most recent first, capped at
    /// [`HISTORY_LIMIT`].
    pub async fn get_node_history(
        &self,
        node_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<NodeHistoryRow>> {
        let limit = limit.min(HISTORY_LIMIT);

        let rows = sqlx::query(
            r#"
            SELECT node_id, timestamp, is_healthy
            FROM node_history
            WHERE node_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(node_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| NodeHistoryRow {
                node_id: row.get("node_id"),
                timestamp: Self::from_millis(row.get("timestamp")),
                is_healthy: row.get("is_healthy"),
            })
            .collect())
    }

    /// Delete node rows (cascading to history/status) whose id matches no
    /// configured pattern. A no-op when no patterns are configured.
    #[instrument(skip_all)]
    pub async fn prune_unknown_nodes(&self, known: &KnownPollers) -> StoreResult<usize> {
        if known.is_empty() {
            return Ok(0);
        }

        let rows = sqlx::query("SELECT node_id FROM nodes")
            .fetch_all(&self.pool)
            .await?;

        let mut deleted = 0;
        for row in rows {
            let node_id: String = row.get("node_id");
            if !known.matches(&node_id) {
                warn!("pruning node {} (matches no configured pattern)", node_id);
                sqlx::query("DELETE FROM nodes WHERE node_id = ?")
                    .bind(&node_id)
                    .execute(&self.pool)
                    .await?;
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    // ========================================================================
    // Service status & derived series
    // ========================================================================

    pub async fn insert_service_status(&self, status: &ServiceStatusRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO service_status
            (node_id, service_name, service_type, available, details, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&status.node_id)
        .bind(&status.service_name)
        .bind(&status.service_type)
        .bind(status.available)
        .bind(&status.details)
        .bind(Self::millis(&status.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Latest stored row per service for one node.
    pub async fn get_latest_service_statuses(
        &self,
        node_id: &str,
    ) -> StoreResult<Vec<ServiceStatusRow>> {
        let rows = sqlx::query(
            r#"
            SELECT s.node_id, s.service_name, s.service_type, s.available, s.details, s.timestamp
            FROM service_status s
            JOIN (
                SELECT service_name, MAX(id) AS max_id
                FROM service_status
                WHERE node_id = ?
                GROUP BY service_name
            ) latest ON s.id = latest.max_id
            ORDER BY s.service_name
            "#,
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::service_status_from_row).collect())
    }

    pub async fn get_service_status(
        &self,
        node_id: &str,
        service_name: &str,
    ) -> StoreResult<ServiceStatusRow> {
        let row = sqlx::query(
            r#"
            SELECT node_id, service_name, service_type, available, details, timestamp
            FROM service_status
            WHERE node_id = ? AND service_name = ?
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(node_id)
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("service {service_name} on {node_id}")))?;

        Ok(Self::service_status_from_row(&row))
    }

    fn service_status_from_row(row: &sqlx::sqlite::SqliteRow) -> ServiceStatusRow {
        ServiceStatusRow {
            node_id: row.get("node_id"),
            service_name: row.get("service_name"),
            service_type: row.get("service_type"),
            available: row.get("available"),
            details: row.get("details"),
            timestamp: Self::from_millis(row.get("timestamp")),
        }
    }

    /// Previous stored availability for a service, if any.
    pub async fn get_prev_availability(
        &self,
        node_id: &str,
        service_name: &str,
    ) -> StoreResult<Option<bool>> {
        let row = sqlx::query(
            r#"
            SELECT available FROM service_status
            WHERE node_id = ? AND service_name = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(node_id)
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("available")))
    }

    pub async fn insert_service_history(&self, point: &ServiceHistoryRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO service_history (node_id, service_name, available, timestamp) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&point.node_id)
        .bind(&point.service_name)
        .bind(point.available)
        .bind(Self::millis(&point.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Availability transitions for one service, most recent first.
    pub async fn get_service_history(
        &self,
        node_id: &str,
        service_name: &str,
        limit: usize,
    ) -> StoreResult<Vec<ServiceHistoryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT node_id, service_name, available, timestamp
            FROM service_history
            WHERE node_id = ? AND service_name = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(node_id)
        .bind(service_name)
        .bind(limit.min(HISTORY_LIMIT) as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ServiceHistoryRow {
                node_id: row.get("node_id"),
                service_name: row.get("service_name"),
                available: row.get("available"),
                timestamp: Self::from_millis(row.get("timestamp")),
            })
            .collect())
    }

    pub async fn insert_sweep_result(&self, sweep: &SweepResultRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sweep_results
            (node_id, network, total_hosts, available_hosts, last_sweep, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sweep.node_id)
        .bind(&sweep.network)
        .bind(sweep.total_hosts)
        .bind(sweep.available_hosts)
        .bind(sweep.last_sweep)
        .bind(Self::millis(&sweep.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_timeseries_metric(&self, metric: &TimeseriesMetricRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO timeseries_metrics
            (node_id, metric_name, metric_type, value, metadata, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&metric.node_id)
        .bind(&metric.metric_name)
        .bind(&metric.metric_type)
        .bind(&metric.value)
        .bind(&metric.metadata)
        .bind(Self::millis(&metric.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Time-series samples for one node, most recent first.
    pub async fn get_timeseries_metrics(
        &self,
        node_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<TimeseriesMetricRow>> {
        let rows = sqlx::query(
            r#"
            SELECT node_id, metric_name, metric_type, value, metadata, timestamp
            FROM timeseries_metrics
            WHERE node_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(node_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TimeseriesMetricRow {
                node_id: row.get("node_id"),
                metric_name: row.get("metric_name"),
                metric_type: row.get("metric_type"),
                value: row.get("value"),
                metadata: row.get("metadata"),
                timestamp: Self::from_millis(row.get("timestamp")),
            })
            .collect())
    }

    /// Delete append-only rows older than the retention window.
    /// Returns the total number of rows removed.
    #[instrument(skip(self))]
    pub async fn clean_old_data(&self, retention: Duration) -> StoreResult<u64> {
        let cutoff = Self::millis(&(Utc::now() - retention));
        let mut deleted = 0u64;

        for table in [
            "node_history",
            "service_status",
            "service_history",
            "sweep_results",
            "port_results",
            "timeseries_metrics",
        ] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE timestamp < ?"))
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }

        if deleted > 0 {
            info!("retention cleanup deleted {} rows", deleted);
        }

        Ok(deleted)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Insert the notification and one pending target row per requested
    /// delivery, inside one transaction.
    #[instrument(skip(self, request), fields(alert_id = %request.alert_id))]
    pub async fn create_notification(
        &self,
        request: &NotificationRequest,
    ) -> StoreResult<Notification> {
        let now = Utc::now();
        let now_millis = Self::millis(&now);
        let metadata = serde_json::to_string(&request.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO notifications
            (alert_id, node_id, service_name, level, title, message, status,
             created_at, updated_at, expire_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?)
            "#,
        )
        .bind(&request.alert_id)
        .bind(&request.node_id)
        .bind(&request.service_name)
        .bind(request.level.as_str())
        .bind(&request.title)
        .bind(&request.message)
        .bind(now_millis)
        .bind(now_millis)
        .bind(request.expire_at.as_ref().map(Self::millis))
        .bind(&metadata)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();

        for target in &request.targets {
            sqlx::query(
                "INSERT INTO notification_targets (notification_id, target_type, target_id, status) \
                 VALUES (?, ?, ?, 'pending')",
            )
            .bind(id)
            .bind(target.target_type.as_str())
            .bind(&target.target_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Notification {
            id,
            alert_id: request.alert_id.clone(),
            node_id: request.node_id.clone(),
            service_name: request.service_name.clone(),
            level: request.level,
            title: request.title.clone(),
            message: request.message.clone(),
            status: NotificationStatus::Pending,
            created_at: now,
            updated_at: now,
            expire_at: request.expire_at,
            metadata: request.metadata.clone(),
        })
    }

    pub async fn get_notification(&self, id: i64) -> StoreResult<Notification> {
        let row = sqlx::query(
            r#"
            SELECT id, alert_id, node_id, service_name, level, title, message,
                   status, created_at, updated_at, expire_at, metadata
            FROM notifications WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("notification {id}")))?;

        Self::notification_from_row(&row)
    }

    fn notification_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Notification> {
        let level: String = row.get("level");
        let status: String = row.get("status");
        let metadata: String = row.get("metadata");

        let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&metadata)
            .map_err(|e| StoreError::Serialization(format!("notification metadata: {e}")))?;

        Ok(Notification {
            id: row.get("id"),
            alert_id: row.get("alert_id"),
            node_id: row.get("node_id"),
            service_name: row.get("service_name"),
            level: NotificationLevel::parse(&level)
                .ok_or_else(|| StoreError::Serialization(format!("unknown level {level:?}")))?,
            title: row.get("title"),
            message: row.get("message"),
            status: NotificationStatus::parse(&status)
                .ok_or_else(|| StoreError::Serialization(format!("unknown status {status:?}")))?,
            created_at: Self::from_millis(row.get("created_at")),
            updated_at: Self::from_millis(row.get("updated_at")),
            expire_at: row
                .get::<Option<i64>, _>("expire_at")
                .map(Self::from_millis),
            metadata,
        })
    }

    pub async fn list_notifications(
        &self,
        filter: &NotificationFilter,
    ) -> StoreResult<Vec<Notification>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, alert_id, node_id, service_name, level, title, message, \
             status, created_at, updated_at, expire_at, metadata \
             FROM notifications WHERE 1 = 1",
        );

        if let Some(alert_id) = &filter.alert_id {
            builder.push(" AND alert_id = ").push_bind(alert_id.clone());
        }
        if let Some(node_id) = &filter.node_id {
            builder.push(" AND node_id = ").push_bind(node_id.clone());
        }
        if let Some(service_name) = &filter.service_name {
            builder
                .push(" AND service_name = ")
                .push_bind(service_name.clone());
        }
        if let Some(level) = filter.level {
            builder.push(" AND level = ").push_bind(level.as_str());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(acknowledged) = filter.acknowledged {
            if acknowledged {
                builder.push(" AND status = 'acknowledged'");
            } else {
                builder.push(" AND status != 'acknowledged'");
            }
        }
        if let Some(since) = &filter.since {
            builder.push(" AND created_at >= ").push_bind(Self::millis(since));
        }
        if let Some(until) = &filter.until {
            builder.push(" AND created_at <= ").push_bind(Self::millis(until));
        }

        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        let offset = filter.offset.unwrap_or(0);

        builder.push(" ORDER BY created_at DESC, id DESC");
        builder.push(" LIMIT ").push_bind(limit as i64);
        builder.push(" OFFSET ").push_bind(offset as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;

        rows.iter().map(Self::notification_from_row).collect()
    }

    pub async fn get_notification_targets(
        &self,
        notification_id: i64,
    ) -> StoreResult<Vec<NotificationTarget>> {
        let rows = sqlx::query(
            r#"
            SELECT notification_id, target_type, target_id, status,
                   sent_at, external_id, response_data
            FROM notification_targets
            WHERE notification_id = ?
            ORDER BY id
            "#,
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let target_type: String = row.get("target_type");
                let status: String = row.get("status");

                Ok(NotificationTarget {
                    notification_id: row.get("notification_id"),
                    target_type: TargetType::parse(&target_type).ok_or_else(|| {
                        StoreError::Serialization(format!("unknown target type {target_type:?}"))
                    })?,
                    target_id: row.get("target_id"),
                    status: TargetStatus::parse(&status).ok_or_else(|| {
                        StoreError::Serialization(format!("unknown target status {status:?}"))
                    })?,
                    sent_at: row.get::<Option<i64>, _>("sent_at").map(Self::from_millis),
                    external_id: row.get("external_id"),
                    response_data: row.get("response_data"),
                })
            })
            .collect()
    }

    /// Record the outcome of one delivery attempt on a target row.
    pub async fn update_target_delivery(
        &self,
        notification_id: i64,
        target_type: TargetType,
        target_id: &str,
        status: TargetStatus,
        external_id: Option<&str>,
        response_data: Option<&str>,
    ) -> StoreResult<()> {
        let sent_at = match status {
            TargetStatus::Sent => Some(Self::millis(&Utc::now())),
            _ => None,
        };

        sqlx::query(
            r#"
            UPDATE notification_targets
            SET status = ?, sent_at = COALESCE(?, sent_at),
                external_id = COALESCE(?, external_id),
                response_data = COALESCE(?, response_data)
            WHERE notification_id = ? AND target_type = ? AND target_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(sent_at)
        .bind(external_id)
        .bind(response_data)
        .bind(notification_id)
        .bind(target_type.as_str())
        .bind(target_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Transition `pending → sent`. Leaves the row alone if the status
    /// moved on during fan-out (e.g. an immediate acknowledgement).
    pub async fn mark_notification_sent(&self, id: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE notifications SET status = 'sent', updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(Self::millis(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Acknowledge a notification: status check, ack insert, status update
    /// and target update happen in one transaction.
    #[instrument(skip(self, comment))]
    pub async fn acknowledge_notification(
        &self,
        id: i64,
        acknowledged_by: &str,
        method: AckMethod,
        comment: Option<&str>,
        target_id: Option<&str>,
    ) -> StoreResult<()> {
        let now = Self::millis(&Utc::now());

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("notification {id}")))?;

        let status: String = row.get("status");
        match NotificationStatus::parse(&status) {
            Some(NotificationStatus::Acknowledged) => {
                return Err(StoreError::Conflict("already acknowledged".to_string()));
            }
            Some(s) if s.is_terminal() => {
                return Err(StoreError::Conflict(format!("notification is {s}")));
            }
            Some(_) => {}
            None => {
                return Err(StoreError::Serialization(format!(
                    "unknown status {status:?}"
                )));
            }
        }

        sqlx::query(
            "INSERT INTO acknowledgments \
             (notification_id, target_id, acknowledged_by, acknowledged_at, method, comment) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(target_id)
        .bind(acknowledged_by)
        .bind(now)
        .bind(method.as_str())
        .bind(comment)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE notifications SET status = 'acknowledged', updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if let Some(target_id) = target_id {
            sqlx::query(
                "UPDATE notification_targets SET status = 'acknowledged' \
                 WHERE notification_id = ? AND target_id = ?",
            )
            .bind(id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Transition to `resolved`. Terminal states conflict.
    pub async fn resolve_notification(&self, id: i64) -> StoreResult<()> {
        let now = Self::millis(&Utc::now());

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("notification {id}")))?;

        let status: String = row.get("status");
        if let Some(s) = NotificationStatus::parse(&status) {
            if s.is_terminal() {
                return Err(StoreError::Conflict(format!("notification is {s}")));
            }
        }

        sqlx::query("UPDATE notifications SET status = 'resolved', updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_notification(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("notification {id}")));
        }

        Ok(())
    }

    /// Move non-terminal notifications past their `expire_at` to `expired`.
    pub async fn expire_notifications(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let now = Self::millis(&now);

        let result = sqlx::query(
            "UPDATE notifications SET status = 'expired', updated_at = ? \
             WHERE expire_at IS NOT NULL AND expire_at < ? \
               AND status IN ('pending', 'sent', 'acknowledged')",
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Age-based deletion: resolved after 30 days, acknowledged after
    /// 7 days, pending after 3 days.
    #[instrument(skip(self))]
    pub async fn cleanup_notifications(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut deleted = 0u64;

        for (status, cutoff) in [
            ("resolved", now - Duration::days(30)),
            ("acknowledged", now - Duration::days(7)),
            ("pending", now - Duration::days(3)),
        ] {
            let result =
                sqlx::query("DELETE FROM notifications WHERE status = ? AND updated_at < ?")
                    .bind(status)
                    .bind(Self::millis(&cutoff))
                    .execute(&self.pool)
                    .await?;
            deleted += result.rows_affected();
        }

        if deleted > 0 {
            debug!("notification cleanup deleted {} rows", deleted);
        }

        Ok(deleted)
    }

    // ========================================================================
    // API keys
    // ========================================================================

    pub async fn create_api_key(&self, key: &ApiKeyRow) -> StoreResult<()> {
        let permissions = serde_json::to_string(&key.permissions)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO api_keys
            (key_id, key_hash, service_name, permissions, created_at, expires_at, last_used_at)
            VALUES (?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(&key.key_id)
        .bind(&key.key_hash)
        .bind(&key.service_name)
        .bind(&permissions)
        .bind(Self::millis(&key.created_at))
        .bind(key.expires_at.as_ref().map(Self::millis))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_api_key(&self, key_id: &str) -> StoreResult<ApiKeyRow> {
        let row = sqlx::query(
            "SELECT key_id, key_hash, service_name, permissions, created_at, expires_at, \
             last_used_at FROM api_keys WHERE key_id = ?",
        )
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("api key {key_id}")))?;

        let permissions: String = row.get("permissions");
        let permissions: Vec<String> = serde_json::from_str(&permissions)
            .map_err(|e| StoreError::Serialization(format!("api key permissions: {e}")))?;

        Ok(ApiKeyRow {
            key_id: row.get("key_id"),
            key_hash: row.get("key_hash"),
            service_name: row.get("service_name"),
            permissions,
            created_at: Self::from_millis(row.get("created_at")),
            expires_at: row
                .get::<Option<i64>, _>("expires_at")
                .map(Self::from_millis),
            last_used_at: row
                .get::<Option<i64>, _>("last_used_at")
                .map(Self::from_millis),
        })
    }

    pub async fn touch_api_key(&self, key_id: &str, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE key_id = ?")
            .bind(Self::millis(&now))
            .bind(key_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn revoke_api_key(&self, key_id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE key_id = ?")
            .bind(key_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("api key {key_id}")));
        }

        Ok(())
    }

    pub async fn close(&self) {
        info!("closing core database");
        self.pool.close().await;
    }
}
