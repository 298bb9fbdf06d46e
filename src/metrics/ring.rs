//! Lock-free latency sample ring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One latency sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub response_time_ns: i64,
    pub service_name: String,
}

/// Fixed-capacity ring of the latest samples for one node.
///
/// Writers fetch-add a single position counter and store into
/// `slot[pos % size]`; readers load the counter once and walk the previous
/// `size` slots. Neither side blocks the other. Concurrent writers landing
/// on the same slot resolve to whichever store happens last: the contract
/// is best-effort latest-N, not causal order.
pub struct MetricRing {
    slots: Box<[ArcSwapOption<MetricPoint>]>,
    pos: AtomicU64,
}

impl MetricRing {
    pub fn new(size: usize) -> Self {
        let slots = (0..size.max(1))
            .map(|_| ArcSwapOption::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            pos: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn add(&self, point: MetricPoint) {
        let pos = self.pos.fetch_add(1, Ordering::AcqRel);
        let idx = (pos % self.slots.len() as u64) as usize;
        self.slots[idx].store(Some(Arc::new(point)));
    }

    /// Snapshot of the ring, newest first. Slots a concurrent writer has
    /// claimed but not yet filled are skipped.
    pub fn snapshot(&self) -> Vec<MetricPoint> {
        let head = self.pos.load(Ordering::Acquire);
        let len = self.slots.len() as u64;
        let count = head.min(len);

        let mut points = Vec::with_capacity(count as usize);
        for back in 0..count {
            let idx = ((head - 1 - back) % len) as usize;
            if let Some(point) = self.slots[idx].load_full() {
                points.push((*point).clone());
            }
        }

        points
    }

    /// Timestamp of the most recently written sample, if any.
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        let head = self.pos.load(Ordering::Acquire);
        if head == 0 {
            return None;
        }

        let len = self.slots.len() as u64;
        let idx = ((head - 1) % len) as usize;
        self.slots[idx].load_full().map(|point| point.timestamp)
    }
}
