//! API shared state and the node snapshot store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::engine::Engine;
use crate::metrics::MetricManager;
use crate::notify::NotificationService;
use crate::store::SqliteStore;
use crate::NodeSnapshot;

/// Latest composed node snapshots, published by the state machine and read
/// by the API. Reader-writer locked; the engine is the only writer.
#[derive(Default)]
pub struct SnapshotStore {
    nodes: RwLock<HashMap<String, NodeSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, snapshot: NodeSnapshot) {
        let mut nodes = self.nodes.write().await;
        nodes.insert(snapshot.node_id.clone(), snapshot);
    }

    /// Flip the health flag on an existing snapshot (monitor-tick path).
    /// A node that never published a snapshot this process lifetime is
    /// left absent; readers fall back to the store.
    pub async fn set_health(&self, node_id: &str, is_healthy: bool) {
        let mut nodes = self.nodes.write().await;
        if let Some(snapshot) = nodes.get_mut(node_id) {
            snapshot.is_healthy = is_healthy;
        }
    }

    pub async fn get(&self, node_id: &str) -> Option<NodeSnapshot> {
        let nodes = self.nodes.read().await;
        nodes.get(node_id).cloned()
    }

    pub async fn list(&self) -> Vec<NodeSnapshot> {
        let nodes = self.nodes.read().await;
        let mut snapshots: Vec<_> = nodes.values().cloned().collect();
        snapshots.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        snapshots
    }
}

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub store: Arc<SqliteStore>,
    pub metrics: Arc<MetricManager>,
    pub notifications: NotificationService,
    pub snapshots: Arc<SnapshotStore>,
}
