//! Active-rule cache and request-to-rule selection.

use super::error::LimiterResult;
use super::glob::AntGlob;
use crate::model::Rule;
use crate::store::{keys, StateStore};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// A rule with its patterns compiled for matching.
#[derive(Debug)]
pub struct CompiledRule {
    /// The stored rule.
    pub rule: Rule,
    path_glob: AntGlob,
    host_globs: Vec<AntGlob>,
    methods: Vec<String>,
    global: bool,
}

impl CompiledRule {
    fn compile(rule: Rule) -> Option<Self> {
        let path_glob = match AntGlob::compile(rule.path_pattern.trim()) {
            Ok(glob) => glob,
            Err(err) => {
                warn!(rule_id = %rule.id, pattern = %rule.path_pattern, error = %err,
                    "skipping rule with invalid path pattern");
                return None;
            },
        };

        let host_globs = rule
            .hosts
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .filter_map(|h| match AntGlob::compile(h) {
                Ok(glob) => Some(glob),
                Err(err) => {
                    warn!(rule_id = %rule.id, host = h, error = %err, "skipping invalid host pattern");
                    None
                },
            })
            .collect();

        let methods = rule
            .methods
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_ascii_uppercase)
            .collect();

        let global = rule.is_global();
        Some(Self {
            rule,
            path_glob,
            host_globs,
            methods,
            global,
        })
    }

    /// Whether this is the `/**` ceiling.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Whether the rule applies to the given request coordinates.
    #[must_use]
    pub fn applies_to(&self, path: &str, method: &str, host: Option<&str>) -> bool {
        if !self.path_glob.matches(path) {
            return false;
        }

        if !self.methods.is_empty() && !self.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            return false;
        }

        if !self.host_globs.is_empty() {
            let Some(host) = host else {
                return false;
            };
            if !self.host_globs.iter().any(|g| g.matches(host)) {
                return false;
            }
        }

        true
    }
}

/// Snapshot cache of active rules, sorted by priority.
///
/// The snapshot is replaced wholesale on [`RuleCache::refresh`]; readers
/// clone the `Arc` and keep it for the duration of a request.
pub struct RuleCache {
    store: Arc<dyn StateStore>,
    snapshot: RwLock<Arc<Vec<Arc<CompiledRule>>>>,
}

impl std::fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCache")
            .field("active_rules", &self.active_count())
            .finish()
    }
}

impl RuleCache {
    /// Create an empty cache over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Reload active rules from the store and publish a new snapshot.
    ///
    /// Malformed rules are skipped with a warning; a reload never fails the
    /// running cache because one stored entry is bad.
    pub async fn refresh(&self) -> LimiterResult<usize> {
        let entries = self.store.hash_entries(keys::RATE_LIMIT_RULES).await?;

        let mut compiled: Vec<Arc<CompiledRule>> = Vec::with_capacity(entries.len());
        for (field, json) in entries {
            let rule: Rule = match serde_json::from_str(&json) {
                Ok(rule) => rule,
                Err(err) => {
                    warn!(rule_id = %field, error = %err, "skipping malformed rule");
                    continue;
                },
            };
            if !rule.active {
                continue;
            }
            if let Some(rule) = CompiledRule::compile(rule) {
                compiled.push(Arc::new(rule));
            }
        }

        compiled.sort_by_key(|r| r.rule.priority);
        let count = compiled.len();

        *self.snapshot.write().unwrap() = Arc::new(compiled);
        info!(count, "loaded active rate limit rules");
        Ok(count)
    }

    /// Rules applying to a request: specific rules first, then global
    /// rules, preserving priority order within each partition.
    #[must_use]
    pub fn select(&self, path: &str, method: &str, host: Option<&str>) -> Vec<Arc<CompiledRule>> {
        let snapshot = self.snapshot.read().unwrap().clone();

        let mut specific = Vec::new();
        let mut global = Vec::new();
        for rule in snapshot.iter() {
            if !rule.applies_to(path, method, host) {
                continue;
            }
            if rule.is_global() {
                global.push(Arc::clone(rule));
            } else {
                specific.push(Arc::clone(rule));
            }
        }

        debug!(path, method, specific = specific.len(), global = global.len(), "matched rules");
        specific.extend(global);
        specific
    }

    /// Number of active rules in the current snapshot.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.snapshot.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn rule(pattern: &str, priority: i32) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            path_pattern: pattern.to_string(),
            allowed_requests: 10,
            window_seconds: 60,
            active: true,
            priority,
            ..Rule::default()
        }
    }

    async fn store_rule(store: &MemoryStore, rule: &Rule) {
        store
            .hash_set(
                keys::RATE_LIMIT_RULES,
                &rule.id.to_string(),
                &serde_json::to_string(rule).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refresh_loads_sorted_active_rules() {
        let store = Arc::new(MemoryStore::new());
        let cache = RuleCache::new(store.clone());

        store_rule(&store, &rule("/api/**", 20)).await;
        store_rule(&store, &rule("/login", 10)).await;
        let mut inactive = rule("/off/**", 1);
        inactive.active = false;
        store_rule(&store, &inactive).await;

        assert_eq!(cache.refresh().await.unwrap(), 2);
        assert_eq!(cache.active_count(), 2);

        let matched = cache.select("/login", "GET", None);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].rule.path_pattern, "/login");
    }

    #[tokio::test]
    async fn malformed_rules_are_skipped_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let cache = RuleCache::new(store.clone());

        store_rule(&store, &rule("/api/**", 1)).await;
        store
            .hash_set(keys::RATE_LIMIT_RULES, "broken", "{not json")
            .await
            .unwrap();

        assert_eq!(cache.refresh().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn specific_rules_come_before_global() {
        let store = Arc::new(MemoryStore::new());
        let cache = RuleCache::new(store.clone());

        store_rule(&store, &rule("/**", 1)).await;
        store_rule(&store, &rule("/api/**", 50)).await;
        cache.refresh().await.unwrap();

        let matched = cache.select("/api/x", "GET", None);
        assert_eq!(matched.len(), 2);
        assert!(!matched[0].is_global());
        assert!(matched[1].is_global());
    }

    #[tokio::test]
    async fn method_and_host_predicates() {
        let store = Arc::new(MemoryStore::new());
        let cache = RuleCache::new(store.clone());

        let mut r = rule("/api/**", 1);
        r.methods = Some("GET, POST".to_string());
        r.hosts = Some("api.example.com, *.internal.example.com".to_string());
        store_rule(&store, &r).await;
        cache.refresh().await.unwrap();

        assert_eq!(cache.select("/api/x", "get", Some("api.example.com")).len(), 1);
        assert_eq!(cache.select("/api/x", "POST", Some("svc.internal.example.com")).len(), 1);
        assert!(cache.select("/api/x", "DELETE", Some("api.example.com")).is_empty());
        assert!(cache.select("/api/x", "GET", Some("other.example.com")).is_empty());
        // Rule requires a host but the request has none.
        assert!(cache.select("/api/x", "GET", None).is_empty());
    }

    #[tokio::test]
    async fn empty_selection_when_nothing_matches() {
        let store = Arc::new(MemoryStore::new());
        let cache = RuleCache::new(store.clone());
        store_rule(&store, &rule("/api/**", 1)).await;
        cache.refresh().await.unwrap();

        assert!(cache.select("/other", "GET", None).is_empty());
    }

    #[test]
    fn invalid_pattern_is_dropped_at_compile() {
        // A pattern long enough to blow the regex size limit is the only
        // realistic compile failure; emulate with a giant repeated group.
        let bad = "/".to_string() + &"ab*".repeat(200_000);
        let r = Rule {
            path_pattern: bad,
            active: true,
            ..Rule::default()
        };
        assert!(CompiledRule::compile(r).is_none());
    }
}
