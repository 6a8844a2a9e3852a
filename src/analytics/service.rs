//! Read side of the analytics pipeline: summary and time-series queries.

use crate::limiter::RuleCache;
use crate::model::{AnalyticsSummary, TimeSeriesPoint};
use crate::store::{keys, StateStore, StoreResult};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// Query window for the summary, matching the dashboard charts.
const SUMMARY_WINDOW_HOURS: i64 = 24;

/// Serves totals and time series from the minute buckets.
pub struct AnalyticsService {
    store: Arc<dyn StateStore>,
    rules: Arc<RuleCache>,
}

impl std::fmt::Debug for AnalyticsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsService").finish()
    }
}

impl AnalyticsService {
    /// Create a reader over the given store and rule cache.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, rules: Arc<RuleCache>) -> Self {
        Self { store, rules }
    }

    /// Totals over the last 24 hours plus the active rule count.
    pub async fn summary(&self) -> StoreResult<AnalyticsSummary> {
        let start_minute = (Utc::now().timestamp() - SUMMARY_WINDOW_HOURS * 3600) / 60;

        let mut allowed = 0u64;
        let mut blocked = 0u64;
        for minute in self.minutes_since(start_minute).await? {
            let (a, b) = self.bucket_totals(minute).await?;
            allowed += a;
            blocked += b;
        }

        Ok(AnalyticsSummary {
            allowed,
            blocked,
            active_policies: self.rules.active_count() as u64,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Per-minute points over the last `hours` hours, oldest first.
    pub async fn time_series(&self, hours: i64) -> StoreResult<Vec<TimeSeriesPoint>> {
        let start_minute = (Utc::now().timestamp() - hours.max(1) * 3600) / 60;

        let mut points = Vec::new();
        for minute in self.minutes_since(start_minute).await? {
            let (allowed, blocked) = self.bucket_totals(minute).await?;
            points.push(TimeSeriesPoint {
                timestamp: minute * 60_000,
                allowed,
                blocked,
            });
        }
        Ok(points)
    }

    async fn minutes_since(&self, start_minute: i64) -> StoreResult<Vec<i64>> {
        let members = self
            .store
            .sorted_set_range_by_score(keys::REQUEST_STATS_INDEX, start_minute as f64, f64::INFINITY)
            .await?;
        Ok(members
            .iter()
            .filter_map(|m| match m.parse() {
                Ok(minute) => Some(minute),
                Err(_) => {
                    warn!(member = %m, "non-numeric entry in the stats index");
                    None
                },
            })
            .collect())
    }

    async fn bucket_totals(&self, minute: i64) -> StoreResult<(u64, u64)> {
        let key = keys::request_stats(minute);
        let allowed = self.field_count(&key, "allowed").await?;
        let blocked = self.field_count(&key, "blocked").await?;
        Ok((allowed, blocked))
    }

    async fn field_count(&self, key: &str, field: &str) -> StoreResult<u64> {
        Ok(self
            .store
            .hash_get(key, field)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn seed_minute(store: &MemoryStore, minute: i64, allowed: i64, blocked: i64) {
        let key = keys::request_stats(minute);
        store.hash_increment(&key, "allowed", allowed).await.unwrap();
        store.hash_increment(&key, "blocked", blocked).await.unwrap();
        store
            .sorted_set_add(keys::REQUEST_STATS_INDEX, &minute.to_string(), minute as f64)
            .await
            .unwrap();
    }

    fn service(store: Arc<MemoryStore>) -> AnalyticsService {
        let rules = Arc::new(RuleCache::new(store.clone()));
        AnalyticsService::new(store, rules)
    }

    #[tokio::test]
    async fn summary_sums_recent_buckets() {
        let store = Arc::new(MemoryStore::new());
        let now_minute = Utc::now().timestamp() / 60;
        seed_minute(&store, now_minute - 1, 7, 3).await;
        seed_minute(&store, now_minute, 2, 1).await;
        // A bucket outside the 24h window is ignored.
        seed_minute(&store, now_minute - 25 * 60, 100, 100).await;

        let summary = service(store).summary().await.unwrap();
        assert_eq!(summary.allowed, 9);
        assert_eq!(summary.blocked, 4);
        assert_eq!(summary.active_policies, 0);
    }

    #[tokio::test]
    async fn time_series_is_oldest_first_with_minute_timestamps() {
        let store = Arc::new(MemoryStore::new());
        let now_minute = Utc::now().timestamp() / 60;
        seed_minute(&store, now_minute - 2, 1, 0).await;
        seed_minute(&store, now_minute, 5, 2).await;

        let points = service(store).time_series(1).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, (now_minute - 2) * 60_000);
        assert_eq!(points[0].allowed, 1);
        assert_eq!(points[1].allowed, 5);
        assert_eq!(points[1].blocked, 2);
    }

    #[tokio::test]
    async fn empty_store_yields_zero_summary() {
        let store = Arc::new(MemoryStore::new());
        let summary = service(store).summary().await.unwrap();
        assert_eq!(summary.allowed, 0);
        assert_eq!(summary.blocked, 0);
    }
}
