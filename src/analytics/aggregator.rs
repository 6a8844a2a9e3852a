//! Minute-bucket aggregation of decision counts.

use crate::settings::SettingsService;
use crate::store::{keys, StateStore, StoreResult};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// In-memory counters the hot path bumps on every terminal decision.
///
/// The aggregator drains them on its tick; nothing else reads them.
#[derive(Debug, Default)]
pub struct DecisionCounters {
    pending_allowed: AtomicU64,
    pending_blocked: AtomicU64,
}

impl DecisionCounters {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one admitted request.
    pub fn record_allowed(&self) {
        self.pending_allowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one rejected request.
    pub fn record_blocked(&self) {
        self.pending_blocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically take both counts, leaving zero behind.
    pub fn drain(&self) -> (u64, u64) {
        (
            self.pending_allowed.swap(0, Ordering::AcqRel),
            self.pending_blocked.swap(0, Ordering::AcqRel),
        )
    }
}

/// Flushes drained counters into minute buckets and prunes old ones.
pub struct StatsAggregator {
    store: Arc<dyn StateStore>,
    settings: Arc<SettingsService>,
    counters: Arc<DecisionCounters>,
}

impl std::fmt::Debug for StatsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsAggregator").finish()
    }
}

impl StatsAggregator {
    /// Create an aggregator draining `counters` into the store.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        settings: Arc<SettingsService>,
        counters: Arc<DecisionCounters>,
    ) -> Self {
        Self {
            store,
            settings,
            counters,
        }
    }

    /// The counters this aggregator drains.
    #[must_use]
    pub fn counters(&self) -> &Arc<DecisionCounters> {
        &self.counters
    }

    /// One aggregation tick: drain, add into the current minute bucket,
    /// refresh its TTL and prune buckets past retention. A tick with
    /// nothing pending is a no-op.
    pub async fn flush(&self) {
        let (allowed, blocked) = self.counters.drain();
        if allowed == 0 && blocked == 0 {
            return;
        }

        if let Err(err) = self.write_bucket(allowed, blocked).await {
            error!(error = %err, allowed, blocked, "failed to flush analytics stats");
        }
    }

    async fn write_bucket(&self, allowed: u64, blocked: u64) -> StoreResult<()> {
        let minute = Utc::now().timestamp() / 60;
        let bucket_key = keys::request_stats(minute);

        let retention_days = self
            .settings
            .get_i64_clamped("analytics-retention-days", 7, 1, 90)
            .await;
        let retention = Duration::from_secs(retention_days as u64 * 86_400);
        let retention_minutes = retention.as_secs() as i64 / 60;

        if allowed > 0 {
            self.store.hash_increment(&bucket_key, "allowed", allowed as i64).await?;
        }
        if blocked > 0 {
            self.store.hash_increment(&bucket_key, "blocked", blocked as i64).await?;
        }
        self.store
            .sorted_set_add(keys::REQUEST_STATS_INDEX, &minute.to_string(), minute as f64)
            .await?;
        self.store.expire(&bucket_key, retention).await?;

        let cutoff = minute - retention_minutes;
        if cutoff > 0 {
            let pruned = self
                .store
                .sorted_set_remove_below(keys::REQUEST_STATS_INDEX, cutoff as f64)
                .await?;
            if pruned > 0 {
                debug!(pruned, "pruned aged minute buckets from the index");
            }
        }

        debug!(minute, allowed, blocked, "flushed decision counts");
        Ok(())
    }
}
