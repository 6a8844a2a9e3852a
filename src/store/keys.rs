//! Key schema for the shared state store.
//!
//! All gateway and admin processes agree on these names; changing one is a
//! wire-compatibility break for running deployments.

use uuid::Uuid;

/// Hash of ruleId -> serialized rule.
pub const RATE_LIMIT_RULES: &str = "rate_limit_rules";

/// Hash of configuration key -> string value.
pub const SYSTEM_CONFIG: &str = "system_config";

/// List of serialized decision log entries, newest first.
pub const TRAFFIC_LOG_LIST: &str = "traffic_logs";

/// Sorted set of minute buckets, scored by minute-since-epoch.
pub const REQUEST_STATS_INDEX: &str = "request_stats:index";

const REQUEST_COUNTER_PREFIX: &str = "request_counter:";
const REQUEST_STATS_PREFIX: &str = "request_stats:";

/// Key of the window counter for one (rule, identifier) pair.
#[must_use]
pub fn request_counter(rule_id: Uuid, identifier: &str) -> String {
    format!("{REQUEST_COUNTER_PREFIX}{rule_id}:{identifier}")
}

/// Key of the minute bucket hash for one minute-since-epoch.
#[must_use]
pub fn request_stats(minute: i64) -> String {
    format!("{REQUEST_STATS_PREFIX}{minute}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_key_embeds_rule_and_identifier() {
        let id = Uuid::nil();
        assert_eq!(
            request_counter(id, "10.1.2.3"),
            "request_counter:00000000-0000-0000-0000-000000000000:10.1.2.3"
        );
    }

    #[test]
    fn stats_key_embeds_minute() {
        assert_eq!(request_stats(29_000_000), "request_stats:29000000");
    }
}
