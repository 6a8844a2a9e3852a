//! Decision log writer and reader.

use crate::model::TrafficLogEntry;
use crate::settings::SettingsService;
use crate::store::{keys, StateStore, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const DEFAULT_MAX_ENTRIES: i64 = 10_000;
const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Appends decision records to the bounded `traffic_logs` list.
///
/// Writes are best-effort: the hot path never fails because the log could
/// not be written.
pub struct TrafficLogWriter {
    store: Arc<dyn StateStore>,
    settings: Arc<SettingsService>,
}

impl std::fmt::Debug for TrafficLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficLogWriter").finish()
    }
}

impl TrafficLogWriter {
    /// Create a writer over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, settings: Arc<SettingsService>) -> Self {
        Self { store, settings }
    }

    /// Append one entry, trim to the configured cap and refresh the list
    /// TTL. Errors are logged and swallowed.
    pub async fn append(&self, entry: &TrafficLogEntry) {
        let max_entries = self
            .settings
            .get_i64_clamped("traffic-logs-max-entries", DEFAULT_MAX_ENTRIES, 1_000, 100_000)
            .await;
        let retention_hours = self
            .settings
            .get_i64_clamped("traffic-logs-retention-hours", DEFAULT_RETENTION_HOURS, 1, 168)
            .await;

        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "failed to serialize traffic log entry");
                return;
            },
        };

        let result: StoreResult<()> = async {
            self.store.list_push_front(keys::TRAFFIC_LOG_LIST, &json).await?;
            self.store
                .list_trim(keys::TRAFFIC_LOG_LIST, max_entries as u64)
                .await?;
            self.store
                .expire(
                    keys::TRAFFIC_LOG_LIST,
                    Duration::from_secs(retention_hours as u64 * 3600),
                )
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            warn!(error = %err, "failed to append traffic log entry");
        }
    }

    /// The most recent `limit` entries, newest first. Entries that no
    /// longer deserialize are skipped.
    pub async fn recent(&self, limit: u64) -> StoreResult<Vec<TrafficLogEntry>> {
        let raw = self.store.list_range(keys::TRAFFIC_LOG_LIST, limit).await?;
        Ok(raw
            .iter()
            .filter_map(|json| match serde_json::from_str(json) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable traffic log entry");
                    None
                },
            })
            .collect())
    }
}
