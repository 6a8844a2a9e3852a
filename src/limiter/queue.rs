//! Per-(rule, identifier) queue depth accounting for delayed admissions.
//!
//! Depth gauges are strictly node-local: in a multi-node deployment each
//! node maintains its own queues. A granted slot is released only by the
//! scheduled decrement; clients that disconnect mid-delay keep their slot
//! accounted, so abandoning requests cannot be used to reserve capacity
//! for free.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

/// A granted queue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSlot {
    /// Position in the queue, starting at 1.
    pub position: u32,
    /// Delay the caller must wait before proceeding.
    pub delay_ms: u64,
}

/// Tracks queue depth per (rule, identifier).
#[derive(Debug, Default)]
pub struct QueueAccountant {
    gauges: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

impl QueueAccountant {
    /// Create an empty accountant.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to admit one request into the queue for (rule, identifier).
    ///
    /// Returns the granted slot, or `None` when the queue is full. The
    /// committed depth after a successful admission is the caller's
    /// position; the matching decrement is scheduled after the computed
    /// delay elapses.
    pub fn try_admit(
        &self,
        rule_id: Uuid,
        identifier: &str,
        max_queue_size: u32,
        delay_per_request_ms: u64,
    ) -> Option<QueueSlot> {
        let key = format!("{rule_id}:{identifier}");
        let gauge = self.gauge(&key);

        let position = loop {
            let depth = gauge.load(Ordering::Acquire);
            if depth >= u64::from(max_queue_size) {
                debug!(key = %key, depth, max = max_queue_size, "queue full");
                return None;
            }
            if gauge
                .compare_exchange(depth, depth + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break depth + 1;
            }
            // Lost the race; re-read and retry.
        };

        let delay_ms = position * delay_per_request_ms;
        debug!(key = %key, position, delay_ms, "request queued");

        let gauge_for_release = Arc::clone(&gauge);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let now = gauge_for_release.fetch_sub(1, Ordering::AcqRel) - 1;
            trace!(key = %key, depth = now, "queue slot released");
        });

        Some(QueueSlot {
            position: position as u32,
            delay_ms,
        })
    }

    /// Drop gauges whose depth has returned to zero.
    pub fn sweep(&self) -> usize {
        let mut gauges = self.gauges.lock().unwrap();
        let before = gauges.len();
        gauges.retain(|_, gauge| gauge.load(Ordering::Acquire) > 0);
        before - gauges.len()
    }

    /// Number of live gauges.
    #[must_use]
    pub fn gauge_count(&self) -> usize {
        self.gauges.lock().unwrap().len()
    }

    /// Current depth for a (rule, identifier), zero when untracked.
    #[must_use]
    pub fn depth(&self, rule_id: Uuid, identifier: &str) -> u64 {
        let key = format!("{rule_id}:{identifier}");
        self.gauges
            .lock()
            .unwrap()
            .get(&key)
            .map_or(0, |gauge| gauge.load(Ordering::Acquire))
    }

    fn gauge(&self, key: &str) -> Arc<AtomicU64> {
        let mut gauges = self.gauges.lock().unwrap();
        Arc::clone(
            gauges
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn positions_and_delays_grow_with_depth() {
        let accountant = QueueAccountant::new();
        let rule = Uuid::new_v4();

        let first = accountant.try_admit(rule, "1.2.3.4", 3, 1000).unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(first.delay_ms, 1000);

        let second = accountant.try_admit(rule, "1.2.3.4", 3, 1000).unwrap();
        assert_eq!(second.position, 2);
        assert_eq!(second.delay_ms, 2000);

        assert_eq!(accountant.depth(rule, "1.2.3.4"), 2);
    }

    #[tokio::test]
    async fn full_queue_refuses_admission() {
        let accountant = QueueAccountant::new();
        let rule = Uuid::new_v4();

        assert!(accountant.try_admit(rule, "ip", 1, 500).is_some());
        assert!(accountant.try_admit(rule, "ip", 1, 500).is_none());

        // A different identifier has its own queue.
        assert!(accountant.try_admit(rule, "other", 1, 500).is_some());
    }

    #[tokio::test]
    async fn zero_capacity_always_refuses() {
        let accountant = QueueAccountant::new();
        assert!(accountant.try_admit(Uuid::new_v4(), "ip", 0, 500).is_none());
    }

    #[tokio::test]
    async fn decrement_fires_after_delay() {
        let accountant = QueueAccountant::new();
        let rule = Uuid::new_v4();

        accountant.try_admit(rule, "ip", 5, 10).unwrap();
        assert_eq!(accountant.depth(rule, "ip"), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(accountant.depth(rule, "ip"), 0);
    }

    #[tokio::test]
    async fn sweep_drops_only_drained_gauges() {
        let accountant = QueueAccountant::new();
        let rule = Uuid::new_v4();

        accountant.try_admit(rule, "draining", 5, 10).unwrap();
        accountant.try_admit(rule, "busy", 5, 60_000).unwrap();
        assert_eq!(accountant.gauge_count(), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(accountant.sweep(), 1);
        assert_eq!(accountant.gauge_count(), 1);
        assert_eq!(accountant.depth(rule, "busy"), 1);
    }

    #[tokio::test]
    async fn concurrent_admissions_get_unique_positions() {
        let accountant = Arc::new(QueueAccountant::new());
        let rule = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let accountant = Arc::clone(&accountant);
            handles.push(tokio::spawn(async move {
                accountant.try_admit(rule, "ip", 8, 60_000).map(|s| s.position)
            }));
        }

        let mut positions: Vec<u32> = Vec::new();
        for handle in handles {
            positions.push(handle.await.unwrap().unwrap());
        }
        positions.sort_unstable();
        assert_eq!(positions, (1..=8).collect::<Vec<_>>());
    }
}
