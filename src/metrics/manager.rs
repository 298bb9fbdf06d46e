//! Per-node ring ownership with a global LRU cap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use super::ring::{MetricPoint, MetricRing};
use crate::config::MetricsConfig;

struct NodeEntry {
    ring: Arc<MetricRing>,
    last_touched: Instant,
}

/// Owns every node's latency ring.
///
/// The node map and its LRU bookkeeping sit behind one mutex; the rings
/// themselves are lock-free, and `add_metric` drops the lock before
/// writing the sample.
pub struct MetricManager {
    enabled: bool,
    retention: usize,
    max_nodes: usize,
    nodes: Mutex<HashMap<String, NodeEntry>>,
}

impl MetricManager {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            enabled: config.enabled,
            retention: config.retention,
            max_nodes: config.max_nodes,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Record one latency sample for a node. No-op when metrics are
    /// disabled. Creates the node's ring lazily, evicting the least
    /// recently written node when the global cap is reached.
    pub fn add_metric(
        &self,
        node_id: &str,
        timestamp: DateTime<Utc>,
        response_time_ns: i64,
        service_name: &str,
    ) {
        if !self.enabled {
            return;
        }

        let ring = {
            let mut nodes = self.nodes.lock().unwrap();

            if let Some(entry) = nodes.get_mut(node_id) {
                entry.last_touched = Instant::now();
                entry.ring.clone()
            } else {
                if nodes.len() >= self.max_nodes {
                    Self::evict_oldest(&mut nodes);
                }

                let ring = Arc::new(MetricRing::new(self.retention));
                nodes.insert(
                    node_id.to_string(),
                    NodeEntry {
                        ring: ring.clone(),
                        last_touched: Instant::now(),
                    },
                );
                trace!("created metric ring for {}", node_id);
                ring
            }
        };

        ring.add(MetricPoint {
            timestamp,
            response_time_ns,
            service_name: service_name.to_string(),
        });
    }

    fn evict_oldest(nodes: &mut HashMap<String, NodeEntry>) {
        let oldest = nodes
            .iter()
            .min_by_key(|(_, entry)| entry.last_touched)
            .map(|(id, _)| id.clone());

        if let Some(id) = oldest {
            debug!("metric node cap reached, evicting {}", id);
            nodes.remove(&id);
        }
    }

    /// Snapshot of a node's ring, newest first; empty when unknown.
    pub fn get_metrics(&self, node_id: &str) -> Vec<MetricPoint> {
        let ring = {
            let nodes = self.nodes.lock().unwrap();
            nodes.get(node_id).map(|entry| entry.ring.clone())
        };

        ring.map(|ring| ring.snapshot()).unwrap_or_default()
    }

    /// Drop nodes whose newest sample is older than `stale_duration`.
    pub fn cleanup_stale_nodes(&self, stale_duration: Duration) {
        let cutoff = Utc::now() - stale_duration;
        let mut nodes = self.nodes.lock().unwrap();
        let before = nodes.len();

        nodes.retain(|_, entry| match entry.ring.newest_timestamp() {
            Some(newest) => newest >= cutoff,
            None => false,
        });

        let dropped = before - nodes.len();
        if dropped > 0 {
            debug!("dropped {} stale metric nodes", dropped);
        }
    }

    pub fn get_active_nodes(&self) -> i64 {
        self.nodes.lock().unwrap().len() as i64
    }
}
