//! # System Configuration
//!
//! Runtime-tunable settings stored in the `system_config` hash of the state
//! store and edited through the admin plane. Reads go through a small
//! per-entry cache so the hot path does not hit the store on every request.

use crate::store::{keys, StateStore, StoreResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a cached setting is trusted before re-reading the store.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Recognized keys with their default values.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("antibot-enabled", "true"),
    ("antibot-min-submit-time", "2000"),
    ("antibot-honeypot-field", "_hp_email"),
    ("antibot-challenge-type", "metarefresh"),
    ("antibot-metarefresh-delay", "3"),
    ("antibot-preact-difficulty", "1"),
    ("analytics-retention-days", "7"),
    ("traffic-logs-retention-hours", "24"),
    ("traffic-logs-max-entries", "10000"),
];

#[derive(Debug, Clone)]
struct CachedValue {
    value: Option<String>,
    fetched_at: Instant,
}

/// Read-through settings service over the `system_config` hash.
pub struct SettingsService {
    store: Arc<dyn StateStore>,
    cache: RwLock<HashMap<String, CachedValue>>,
}

impl std::fmt::Debug for SettingsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsService")
            .field("cached_keys", &self.cache.read().unwrap().len())
            .finish()
    }
}

impl SettingsService {
    /// Create a settings service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Write every recognized default that is not already set.
    ///
    /// Called once at startup so a fresh store starts fully populated and
    /// the admin UI has values to show.
    pub async fn seed_defaults(&self) -> StoreResult<()> {
        for (key, value) in DEFAULTS {
            if self.store.hash_get(keys::SYSTEM_CONFIG, key).await?.is_none() {
                self.store.hash_set(keys::SYSTEM_CONFIG, key, value).await?;
                debug!(key, value, "seeded default setting");
            }
        }
        Ok(())
    }

    /// Get a setting, falling back to `default` when unset or the store is
    /// unreachable.
    pub async fn get_str(&self, key: &str, default: &str) -> String {
        if let Some(cached) = self.cached(key) {
            return cached.unwrap_or_else(|| default.to_string());
        }

        match self.store.hash_get(keys::SYSTEM_CONFIG, key).await {
            Ok(value) => {
                self.cache.write().unwrap().insert(
                    key.to_string(),
                    CachedValue {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                value.unwrap_or_else(|| default.to_string())
            },
            Err(err) => {
                warn!(key, error = %err, "settings read failed, using default");
                default.to_string()
            },
        }
    }

    /// Get a boolean setting.
    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        let text = self.get_str(key, if default { "true" } else { "false" }).await;
        text.eq_ignore_ascii_case("true")
    }

    /// Get an integer setting; unparsable values fall back to `default`.
    pub async fn get_i64(&self, key: &str, default: i64) -> i64 {
        let text = self.get_str(key, &default.to_string()).await;
        text.parse().unwrap_or(default)
    }

    /// Get an integer setting clamped into `[min, max]`.
    pub async fn get_i64_clamped(&self, key: &str, default: i64, min: i64, max: i64) -> i64 {
        self.get_i64(key, default).await.clamp(min, max)
    }

    /// All settings currently stored, as (key, value) pairs.
    pub async fn all(&self) -> StoreResult<Vec<(String, String)>> {
        let mut entries = self.store.hash_entries(keys::SYSTEM_CONFIG).await?;
        entries.sort();
        Ok(entries)
    }

    /// Update one setting and refresh the cache entry.
    pub async fn update(&self, key: &str, value: &str) -> StoreResult<()> {
        self.store.hash_set(keys::SYSTEM_CONFIG, key, value).await?;
        self.cache.write().unwrap().insert(
            key.to_string(),
            CachedValue {
                value: Some(value.to_string()),
                fetched_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Drop every cached entry, forcing re-reads.
    pub fn invalidate_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    fn cached(&self, key: &str) -> Option<Option<String>> {
        let cache = self.cache.read().unwrap();
        cache
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < CACHE_TTL)
            .map(|entry| entry.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> SettingsService {
        SettingsService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn defaults_are_seeded_once() {
        let svc = service();
        svc.seed_defaults().await.unwrap();

        assert_eq!(svc.get_str("antibot-honeypot-field", "x").await, "_hp_email");

        // A later seed must not clobber an operator change.
        svc.update("antibot-honeypot-field", "_hp_phone").await.unwrap();
        svc.seed_defaults().await.unwrap();
        assert_eq!(svc.get_str("antibot-honeypot-field", "x").await, "_hp_phone");
    }

    #[tokio::test]
    async fn typed_getters_parse_and_fall_back() {
        let svc = service();
        svc.update("antibot-enabled", "false").await.unwrap();
        svc.update("antibot-min-submit-time", "1500").await.unwrap();
        svc.update("analytics-retention-days", "not-a-number").await.unwrap();

        assert!(!svc.get_bool("antibot-enabled", true).await);
        assert_eq!(svc.get_i64("antibot-min-submit-time", 2000).await, 1500);
        assert_eq!(svc.get_i64("analytics-retention-days", 7).await, 7);
    }

    #[tokio::test]
    async fn clamped_getter_applies_bounds() {
        let svc = service();
        svc.update("analytics-retention-days", "500").await.unwrap();
        assert_eq!(svc.get_i64_clamped("analytics-retention-days", 7, 1, 90).await, 90);

        svc.update("analytics-retention-days", "0").await.unwrap();
        svc.invalidate_cache();
        assert_eq!(svc.get_i64_clamped("analytics-retention-days", 7, 1, 90).await, 1);
    }

    #[tokio::test]
    async fn update_refreshes_cache_immediately() {
        let svc = service();
        assert_eq!(svc.get_str("antibot-challenge-type", "metarefresh").await, "metarefresh");

        svc.update("antibot-challenge-type", "preact").await.unwrap();
        assert_eq!(svc.get_str("antibot-challenge-type", "metarefresh").await, "preact");
    }
}
