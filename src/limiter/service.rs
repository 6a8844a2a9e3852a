//! Counter accounting and the per-request rate limit decision.

use super::identifier::{self, RequestIdentity};
use super::queue::QueueAccountant;
use super::rules::RuleCache;
use crate::model::{RequestCounter, Rule};
use crate::store::{keys, StateStore};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Extra counter lifetime beyond the window, so laggard writes still land.
const COUNTER_TTL_SLACK: Duration = Duration::from_secs(5);

/// Aggregated decision for one request across every matched rule.
#[derive(Debug, Clone)]
pub struct RateLimitOutcome {
    /// Whether the request may proceed to the upstream.
    pub allowed: bool,
    /// Whether queueing was involved (delayed admission or full queue).
    pub queued: bool,
    /// Delay to apply before forwarding; zero when none.
    pub delay_ms: u64,
    /// Identifier the decision was keyed by (first evaluated rule's).
    pub identifier: String,
    /// Every rule that participated.
    pub rule_ids: Vec<Uuid>,
    /// Upstream named by the first matched rule that carries one.
    pub target_uri: Option<String>,
}

impl RateLimitOutcome {
    fn unrestricted(identifier: String) -> Self {
        Self {
            allowed: true,
            queued: false,
            delay_ms: 0,
            identifier,
            rule_ids: Vec::new(),
            target_uri: None,
        }
    }
}

/// Decision of a single rule.
#[derive(Debug, Clone, Copy)]
enum RuleDecision {
    Allowed,
    Delayed(u64),
    Blocked { queue_full: bool },
}

/// Counters for limiter observability.
#[derive(Debug, Default)]
pub struct LimiterStats {
    /// Requests evaluated.
    pub requests_checked: AtomicU64,
    /// Requests admitted (with or without delay).
    pub requests_allowed: AtomicU64,
    /// Requests rejected.
    pub requests_blocked: AtomicU64,
    /// Requests admitted after a queue delay.
    pub requests_delayed: AtomicU64,
    /// Admissions granted because the counter read failed.
    pub fail_open: AtomicU64,
}

impl LimiterStats {
    fn record(&self, outcome: &RateLimitOutcome) {
        self.requests_checked.fetch_add(1, Ordering::Relaxed);
        if outcome.allowed {
            self.requests_allowed.fetch_add(1, Ordering::Relaxed);
            if outcome.delay_ms > 0 {
                self.requests_delayed.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.requests_blocked.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// The rate limiter: rule selection, identifier resolution, counter
/// accounting and queue admission.
///
/// The counter update is a read-modify-write without a transaction; two
/// requests racing at the threshold can both observe `count < N` and both
/// admit. The overshoot is bounded by the number of concurrent writers and
/// is accepted in exchange for a single round trip per check.
pub struct RateLimiterService {
    store: Arc<dyn StateStore>,
    rules: Arc<RuleCache>,
    queues: Arc<QueueAccountant>,
    stats: LimiterStats,
}

impl std::fmt::Debug for RateLimiterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterService")
            .field("rules", &self.rules)
            .field("stats", &self.stats)
            .finish()
    }
}

impl RateLimiterService {
    /// Create a limiter over the given store, cache and queue accountant.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, rules: Arc<RuleCache>, queues: Arc<QueueAccountant>) -> Self {
        Self {
            store,
            rules,
            queues,
            stats: LimiterStats::default(),
        }
    }

    /// The rule cache this limiter evaluates.
    #[must_use]
    pub fn rules(&self) -> &Arc<RuleCache> {
        &self.rules
    }

    /// The queue accountant.
    #[must_use]
    pub fn queues(&self) -> &Arc<QueueAccountant> {
        &self.queues
    }

    /// Observability counters.
    #[must_use]
    pub fn stats(&self) -> &LimiterStats {
        &self.stats
    }

    /// Evaluate every matched rule and aggregate the result.
    ///
    /// Specific rules run before global ones; if any rule blocks, the
    /// request is blocked, otherwise the largest queue delay wins. A
    /// request no rule matches is allowed unconditionally.
    pub async fn check(
        &self,
        identity: &RequestIdentity<'_>,
        path: &str,
        method: &str,
        host: Option<&str>,
    ) -> RateLimitOutcome {
        let matched = self.rules.select(path, method, host);
        if matched.is_empty() {
            let outcome = RateLimitOutcome::unrestricted(identity.client_ip.to_string());
            self.stats.record(&outcome);
            return outcome;
        }

        let mut allowed = true;
        let mut queued = false;
        let mut blocked_queue_full = false;
        let mut delay_ms = 0u64;
        let mut first_identifier: Option<String> = None;
        let mut target_uri: Option<String> = None;
        let mut rule_ids = Vec::with_capacity(matched.len());

        for compiled in &matched {
            let rule = &compiled.rule;
            let id = identifier::resolve(rule, identity);
            if first_identifier.is_none() {
                first_identifier = Some(id.clone());
            }
            if target_uri.is_none() {
                target_uri = rule
                    .target_uri
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string);
            }
            rule_ids.push(rule.id);

            match self.check_rule(rule, &id).await {
                RuleDecision::Allowed => {},
                RuleDecision::Delayed(ms) => {
                    queued = true;
                    delay_ms = delay_ms.max(ms);
                },
                RuleDecision::Blocked { queue_full } => {
                    allowed = false;
                    blocked_queue_full = blocked_queue_full || queue_full;
                },
            }
        }

        if !allowed {
            delay_ms = 0;
            queued = blocked_queue_full;
        }

        let outcome = RateLimitOutcome {
            allowed,
            queued,
            delay_ms,
            identifier: first_identifier.unwrap_or_else(|| identity.client_ip.to_string()),
            rule_ids,
            target_uri,
        };
        self.stats.record(&outcome);
        outcome
    }

    /// Check one rule against its window counter.
    async fn check_rule(&self, rule: &Rule, identifier: &str) -> RuleDecision {
        let key = keys::request_counter(rule.id, identifier);
        let now = Utc::now();

        let counter = match self.store.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str::<RequestCounter>(&json) {
                Ok(counter) => counter,
                Err(err) => {
                    warn!(key = %key, error = %err, "unreadable counter, starting a fresh window");
                    RequestCounter::fresh(now)
                },
            },
            Ok(None) => RequestCounter::fresh(now),
            Err(err) => {
                // Counters are unreadable: prefer availability over strict
                // accounting and let the request through.
                error!(key = %key, error = %err, "counter read failed, admitting request");
                self.stats.fail_open.fetch_add(1, Ordering::Relaxed);
                return RuleDecision::Allowed;
            },
        };

        let window_end = counter.window_start + ChronoDuration::seconds(i64::from(rule.window_seconds));
        let ttl = Duration::from_secs(u64::from(rule.window_seconds)) + COUNTER_TTL_SLACK;

        if now > window_end {
            self.write_counter(&key, &RequestCounter { count: 1, window_start: now }, ttl)
                .await;
            return RuleDecision::Allowed;
        }

        if counter.count < rule.allowed_requests {
            self.write_counter(
                &key,
                &RequestCounter {
                    count: counter.count + 1,
                    window_start: counter.window_start,
                },
                ttl,
            )
            .await;
            return RuleDecision::Allowed;
        }

        if !rule.queue_enabled {
            debug!(rule_id = %rule.id, identifier, "window exhausted, blocking");
            return RuleDecision::Blocked { queue_full: false };
        }

        match self
            .queues
            .try_admit(rule.id, identifier, rule.max_queue_size, rule.delay_per_request_ms)
        {
            Some(slot) => RuleDecision::Delayed(slot.delay_ms),
            None => RuleDecision::Blocked { queue_full: true },
        }
    }

    /// Persist a counter; failures are logged and swallowed, the admission
    /// stands.
    async fn write_counter(&self, key: &str, counter: &RequestCounter, ttl: Duration) {
        let json = match serde_json::to_string(counter) {
            Ok(json) => json,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to serialize counter");
                return;
            },
        };
        if let Err(err) = self.store.set_with_ttl(key, &json, ttl).await {
            warn!(key = %key, error = %err, "failed to update counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LimitMode;
    use crate::store::MemoryStore;
    use http::{HeaderMap, HeaderValue};

    struct Fixture {
        store: Arc<MemoryStore>,
        service: RateLimiterService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let rules = Arc::new(RuleCache::new(store.clone()));
        let queues = Arc::new(QueueAccountant::new());
        Fixture {
            store: store.clone(),
            service: RateLimiterService::new(store, rules, queues),
        }
    }

    async fn install(fixture: &Fixture, rule: &Rule) {
        fixture
            .store
            .hash_set(
                keys::RATE_LIMIT_RULES,
                &rule.id.to_string(),
                &serde_json::to_string(rule).unwrap(),
            )
            .await
            .unwrap();
        fixture.service.rules().refresh().await.unwrap();
    }

    fn quota_rule(pattern: &str, allowed: u32, window: u32) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            path_pattern: pattern.to_string(),
            allowed_requests: allowed,
            window_seconds: window,
            active: true,
            priority: 10,
            ..Rule::default()
        }
    }

    fn identity<'a>(headers: &'a HeaderMap) -> RequestIdentity<'a> {
        RequestIdentity {
            headers,
            client_ip: "10.0.0.1",
            body: None,
        }
    }

    #[tokio::test]
    async fn serial_window_admits_exactly_n() {
        let f = fixture();
        install(&f, &quota_rule("/api/**", 3, 15)).await;
        let headers = HeaderMap::new();

        for _ in 0..3 {
            assert!(f.service.check(&identity(&headers), "/api/hello", "GET", None).await.allowed);
        }
        let fourth = f.service.check(&identity(&headers), "/api/hello", "GET", None).await;
        assert!(!fourth.allowed);
        assert!(!fourth.queued);
        assert_eq!(fourth.delay_ms, 0);
    }

    #[tokio::test]
    async fn unmatched_requests_are_unrestricted() {
        let f = fixture();
        install(&f, &quota_rule("/api/**", 1, 15)).await;
        let headers = HeaderMap::new();

        for _ in 0..5 {
            let outcome = f.service.check(&identity(&headers), "/public", "GET", None).await;
            assert!(outcome.allowed);
            assert!(outcome.rule_ids.is_empty());
            assert_eq!(outcome.identifier, "10.0.0.1");
        }
    }

    #[tokio::test]
    async fn expired_window_resets_the_counter() {
        let f = fixture();
        let rule = quota_rule("/api/**", 1, 15);
        install(&f, &rule).await;
        let headers = HeaderMap::new();

        assert!(f.service.check(&identity(&headers), "/api/x", "GET", None).await.allowed);
        assert!(!f.service.check(&identity(&headers), "/api/x", "GET", None).await.allowed);

        // Backdate the stored window so it has expired.
        let key = keys::request_counter(rule.id, "10.0.0.1");
        let stale = RequestCounter {
            count: 1,
            window_start: Utc::now() - ChronoDuration::seconds(16),
        };
        f.store
            .set_with_ttl(&key, &serde_json::to_string(&stale).unwrap(), Duration::from_secs(20))
            .await
            .unwrap();

        assert!(f.service.check(&identity(&headers), "/api/x", "GET", None).await.allowed);
    }

    #[tokio::test]
    async fn queue_grants_growing_delays_then_blocks() {
        let f = fixture();
        let mut rule = quota_rule("/q/**", 1, 60);
        rule.queue_enabled = true;
        rule.max_queue_size = 2;
        rule.delay_per_request_ms = 1000;
        install(&f, &rule).await;
        let headers = HeaderMap::new();

        let first = f.service.check(&identity(&headers), "/q/x", "GET", None).await;
        assert!(first.allowed && first.delay_ms == 0);

        let second = f.service.check(&identity(&headers), "/q/x", "GET", None).await;
        assert!(second.allowed && second.queued);
        assert_eq!(second.delay_ms, 1000);

        let third = f.service.check(&identity(&headers), "/q/x", "GET", None).await;
        assert!(third.allowed && third.queued);
        assert_eq!(third.delay_ms, 2000);

        let fourth = f.service.check(&identity(&headers), "/q/x", "GET", None).await;
        assert!(!fourth.allowed);
        assert!(fourth.queued, "queue-full rejection carries the queued marker");
    }

    #[tokio::test]
    async fn disabling_queue_reverts_to_plain_rejection() {
        let f = fixture();
        let rule = quota_rule("/q/**", 1, 60);
        install(&f, &rule).await;
        let headers = HeaderMap::new();

        assert!(f.service.check(&identity(&headers), "/q/x", "GET", None).await.allowed);
        let overflow = f.service.check(&identity(&headers), "/q/x", "GET", None).await;
        assert!(!overflow.allowed);
        assert!(!overflow.queued);
    }

    #[tokio::test]
    async fn distinct_header_identifiers_get_distinct_counters() {
        let f = fixture();
        let mut rule = quota_rule("/api/**", 1, 60);
        rule.header_limit_enabled = true;
        rule.header_name = Some("X-Api-Key".to_string());
        install(&f, &rule).await;

        let mut h1 = HeaderMap::new();
        h1.insert("x-api-key", HeaderValue::from_static("alpha"));
        let mut h2 = HeaderMap::new();
        h2.insert("x-api-key", HeaderValue::from_static("beta"));

        assert!(f.service.check(&identity(&h1), "/api/x", "GET", None).await.allowed);
        assert!(f.service.check(&identity(&h2), "/api/x", "GET", None).await.allowed);
        assert!(!f.service.check(&identity(&h1), "/api/x", "GET", None).await.allowed);
    }

    #[tokio::test]
    async fn combine_mode_keys_counters_by_ip_and_value() {
        let f = fixture();
        let mut rule = quota_rule("/api/**", 1, 60);
        rule.header_limit_enabled = true;
        rule.header_name = Some("X-Api-Key".to_string());
        rule.header_limit_type = Some(LimitMode::CombineWithIp);
        install(&f, &rule).await;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("alpha"));

        let outcome = f.service.check(&identity(&headers), "/api/x", "GET", None).await;
        assert_eq!(outcome.identifier, "10.0.0.1:alpha");
    }

    #[tokio::test]
    async fn global_rule_caps_what_specific_rules_allow() {
        let f = fixture();
        let generous = quota_rule("/api/**", 100, 60);
        let mut ceiling = quota_rule("/**", 2, 60);
        ceiling.priority = 99;
        install(&f, &generous).await;
        install(&f, &ceiling).await;
        let headers = HeaderMap::new();

        assert!(f.service.check(&identity(&headers), "/api/x", "GET", None).await.allowed);
        assert!(f.service.check(&identity(&headers), "/api/x", "GET", None).await.allowed);

        let third = f.service.check(&identity(&headers), "/api/x", "GET", None).await;
        assert!(!third.allowed, "the global ceiling wins over the generous specific rule");
        assert_eq!(third.rule_ids.len(), 2);
    }

    #[tokio::test]
    async fn stats_track_outcomes() {
        let f = fixture();
        install(&f, &quota_rule("/api/**", 1, 60)).await;
        let headers = HeaderMap::new();

        f.service.check(&identity(&headers), "/api/x", "GET", None).await;
        f.service.check(&identity(&headers), "/api/x", "GET", None).await;

        let stats = f.service.stats();
        assert_eq!(stats.requests_checked.load(Ordering::Relaxed), 2);
        assert_eq!(stats.requests_allowed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.requests_blocked.load(Ordering::Relaxed), 1);
    }
}
