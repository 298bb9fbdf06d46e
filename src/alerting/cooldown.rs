//! Per-dispatcher alert cooldown bookkeeping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Dedup key for one logical alert. Node-level alerts carry an empty
/// `service_name`, so they never collide with service-level alerts for the
/// same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub node_id: String,
    pub title: String,
    pub service_name: String,
}

/// Last-sent instants per alert key, guarded by one mutex.
///
/// Recovery handling is strictly a key-erase: see [`CooldownTracker::clear_node`].
pub struct CooldownTracker {
    cooldown: Duration,
    entries: Mutex<HashMap<CooldownKey, Instant>>,
}

impl CooldownTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the alert may be sent, recording the send instant.
    /// A zero cooldown disables the check entirely.
    pub fn check_and_touch(&self, key: CooldownKey) -> bool {
        if self.cooldown.is_zero() {
            return true;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        if let Some(last) = entries.get(&key) {
            if now.duration_since(*last) < self.cooldown {
                return false;
            }
        }

        entries.insert(key, now);
        true
    }

    /// Erase every entry for a node, both node-level and service-level,
    /// so a recovery alert is never suppressed by the preceding down alert.
    pub fn clear_node(&self, node_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|key, _| key.node_id != node_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
