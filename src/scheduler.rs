//! Wall-clock loops: monitor tick, never-reported check, retention,
//! stale-metric GC and notification maintenance.
//!
//! Each loop is an independent tokio task selecting its interval against
//! the shared shutdown signal. Loops swallow their errors into logs; none
//! of them can abort the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info};

use crate::config::KnownPollers;
use crate::engine::Engine;
use crate::metrics::MetricManager;
use crate::store::SqliteStore;

/// Health pass cadence
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before the one-shot never-reported check
const NEVER_REPORTED_DELAY: Duration = Duration::from_secs(30);

/// Retention pass cadence
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Stale metric-node GC cadence and staleness window
const STALE_METRICS_INTERVAL: Duration = Duration::from_secs(60 * 60);
const STALE_METRICS_AGE_DAYS: i64 = 7;

/// Notification maintenance cadence
const NOTIFICATION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct Scheduler {
    engine: Arc<Engine>,
    store: Arc<SqliteStore>,
    metrics: Arc<MetricManager>,
    known: KnownPollers,
    retention: chrono::Duration,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<Engine>,
        store: Arc<SqliteStore>,
        metrics: Arc<MetricManager>,
        known: KnownPollers,
        retention_days: u32,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            store,
            metrics,
            known,
            retention: chrono::Duration::days(retention_days as i64),
            shutdown,
        }
    }

    /// Spawn every loop. Returns after spawning; the loops run until the
    /// shutdown signal flips.
    pub fn start(self) {
        let Self {
            engine,
            store,
            metrics,
            known,
            retention,
            shutdown,
        } = self;

        // Monitor tick
        {
            let engine = engine.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut tick = time::interval(MONITOR_INTERVAL);
                tick.tick().await; // first tick fires immediately, skip it
                loop {
                    tokio::select! {
                        _ = tick.tick() => engine.check_health().await,
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("monitor loop stopped");
            });
        }

        // One-shot never-reported check shortly after startup
        {
            let engine = engine.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = time::sleep(NEVER_REPORTED_DELAY) => {
                        engine.check_never_reported().await;
                    }
                    _ = shutdown.changed() => {}
                }
            });
        }

        // Daily retention: old rows, then nodes outside the configured
        // patterns
        {
            let store = store.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut tick = time::interval(RETENTION_INTERVAL);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            if let Err(e) = store.clean_old_data(retention).await {
                                error!("retention cleanup failed: {}", e);
                            }
                            match store.prune_unknown_nodes(&known).await {
                                Ok(0) => {}
                                Ok(n) => info!("pruned {} unknown nodes", n),
                                Err(e) => error!("unknown-node prune failed: {}", e),
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("retention loop stopped");
            });
        }

        // Hourly stale metric-node GC
        {
            let metrics = metrics.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut tick = time::interval(STALE_METRICS_INTERVAL);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            metrics.cleanup_stale_nodes(chrono::Duration::days(STALE_METRICS_AGE_DAYS));
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("metric GC loop stopped");
            });
        }

        // Hourly notification maintenance: expire overdue, delete aged out
        {
            let store = store.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut tick = time::interval(NOTIFICATION_CLEANUP_INTERVAL);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            let now = chrono::Utc::now();
                            match store.expire_notifications(now).await {
                                Ok(0) => {}
                                Ok(n) => info!("expired {} notifications", n),
                                Err(e) => error!("notification expiry failed: {}", e),
                            }
                            if let Err(e) = store.cleanup_notifications(now).await {
                                error!("notification cleanup failed: {}", e);
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("notification maintenance loop stopped");
            });
        }
    }
}
