//! Domain records shared between the data plane and the admin plane.
//!
//! Everything here is serialized to JSON when it crosses into the state
//! store or onto the analytics push channel, so field names are part of the
//! wire contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an extracted identifier relates to the client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitMode {
    /// Use the extracted value instead of the IP.
    #[default]
    ReplaceIp,
    /// Prefix the extracted value with the IP.
    CombineWithIp,
}

/// Body formats the identifier extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BodyContentType {
    /// `application/json`, dot-path field addressing.
    #[default]
    Json,
    /// `application/x-www-form-urlencoded`, field name lookup.
    FormUrlEncoded,
    /// `application/xml` / `text/xml`, element-path addressing.
    Xml,
    /// `multipart/form-data`, text part lookup by name.
    Multipart,
}

/// A declarative traffic-shaping policy.
///
/// Rules are stored as JSON fields of the `rate_limit_rules` hash and
/// evaluated in ascending `priority` order. A rule whose trimmed
/// `path_pattern` is exactly `/**` applies as a global ceiling after all
/// specific rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    /// Unique rule id; assigned by the admin plane when absent on create.
    pub id: Uuid,
    /// Ant-style glob the request path must match (`?`, `*`, `**`).
    pub path_pattern: String,
    /// Upstream base URI requests matching this rule are forwarded to.
    pub target_uri: Option<String>,
    /// Admissions allowed per window.
    pub allowed_requests: u32,
    /// Window length in seconds.
    pub window_seconds: u32,
    /// Inactive rules stay stored but are not evaluated.
    pub active: bool,
    /// Evaluation order; lower runs earlier.
    pub priority: i32,

    /// Delay overflow instead of rejecting it.
    pub queue_enabled: bool,
    /// Most admissions that may be waiting per identifier.
    pub max_queue_size: u32,
    /// Delay per queue position in milliseconds.
    pub delay_per_request_ms: u64,

    /// Count by JWT claims instead of IP.
    pub jwt_enabled: bool,
    /// Claim names to extract, joined in order.
    pub jwt_claims: Vec<String>,
    /// Separator between claim values.
    pub jwt_claim_separator: Option<String>,

    /// Count by a field of the request body.
    pub body_limit_enabled: bool,
    /// Dot path (JSON), field name (form/multipart) or element path (XML).
    pub body_field_path: Option<String>,
    /// How the body value combines with the IP.
    pub body_limit_type: Option<LimitMode>,
    /// Body format the field is extracted from.
    pub body_content_type: Option<BodyContentType>,

    /// Count by a request header.
    pub header_limit_enabled: bool,
    /// Header to read.
    pub header_name: Option<String>,
    /// How the header value combines with the IP.
    pub header_limit_type: Option<LimitMode>,

    /// Count by a cookie.
    pub cookie_limit_enabled: bool,
    /// Cookie to read.
    pub cookie_name: Option<String>,
    /// How the cookie value combines with the IP.
    pub cookie_limit_type: Option<LimitMode>,

    /// CSV of methods this rule applies to; empty matches any.
    pub methods: Option<String>,
    /// CSV of host globs this rule applies to; empty matches any.
    pub hosts: Option<String>,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            path_pattern: String::new(),
            target_uri: None,
            allowed_requests: 0,
            window_seconds: 0,
            active: false,
            priority: 0,
            queue_enabled: false,
            max_queue_size: 0,
            delay_per_request_ms: 0,
            jwt_enabled: false,
            jwt_claims: Vec::new(),
            jwt_claim_separator: None,
            body_limit_enabled: false,
            body_field_path: None,
            body_limit_type: None,
            body_content_type: None,
            header_limit_enabled: false,
            header_name: None,
            header_limit_type: None,
            cookie_limit_enabled: false,
            cookie_name: None,
            cookie_limit_type: None,
            methods: None,
            hosts: None,
        }
    }
}

impl Rule {
    /// Whether this rule is the global ceiling (`/**`).
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.path_pattern.trim() == "/**"
    }
}

/// Window counter for one (rule, identifier) pair.
///
/// Stored with a TTL slightly longer than the rule's window so abandoned
/// counters age out on their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCounter {
    /// Admissions observed in the current window.
    pub count: u32,
    /// When the current window opened.
    pub window_start: DateTime<Utc>,
}

impl RequestCounter {
    /// A fresh counter opening a window now.
    #[must_use]
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }
}

/// Terminal outcome of one request, as recorded in the decision log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    /// Forwarded immediately.
    Allowed,
    /// Forwarded after a queue delay.
    Queued,
    /// Rejected by the rate limiter.
    Blocked,
    /// Rejected by the anti-bot validator.
    RejectedByAntibot,
}

impl Decision {
    /// Whether the request reached the upstream.
    #[must_use]
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Allowed | Self::Queued)
    }
}

/// One decision log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficLogEntry {
    /// Record id.
    pub id: Uuid,
    /// Wall-clock time of the decision.
    pub timestamp: DateTime<Utc>,
    /// Request method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request host, when present.
    pub host: Option<String>,
    /// Client address.
    pub client_ip: String,
    /// Identifier the counters were keyed by.
    pub identifier: String,
    /// Terminal outcome.
    pub decision: Decision,
    /// Status code returned to the client at decision time.
    pub status_code: u16,
    /// Queue delay applied, zero if none.
    pub delay_ms: u64,
    /// Rules that participated in the decision.
    pub rule_ids: Vec<Uuid>,
}

/// Rolling totals pushed to admin clients and served by the summary query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    /// Admitted requests over the query window.
    pub allowed: u64,
    /// Rejected requests over the query window.
    pub blocked: u64,
    /// Active rules at computation time.
    pub active_policies: u64,
    /// Computation time, milliseconds since epoch.
    pub timestamp: i64,
}

/// One minute of aggregated decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    /// Start of the minute, milliseconds since epoch.
    pub timestamp: i64,
    /// Admitted requests in this minute.
    pub allowed: u64,
    /// Rejected requests in this minute.
    pub blocked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_round_trips_with_camel_case_fields() {
        let rule = Rule {
            id: Uuid::new_v4(),
            path_pattern: "/api/**".to_string(),
            target_uri: Some("http://127.0.0.1:9000".to_string()),
            allowed_requests: 3,
            window_seconds: 15,
            active: true,
            priority: 10,
            header_limit_enabled: true,
            header_name: Some("X-Api-Key".to_string()),
            header_limit_type: Some(LimitMode::CombineWithIp),
            ..Rule::default()
        };

        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"pathPattern\":\"/api/**\""));
        assert!(json.contains("\"headerLimitType\":\"combine_with_ip\""));

        let back: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, rule.id);
        assert_eq!(back.header_limit_type, Some(LimitMode::CombineWithIp));
    }

    #[test]
    fn partial_rule_json_fills_defaults() {
        let json = r#"{"id":"6f4b4c9c-3a39-4e53-a8a5-6f8dd2d7a001","pathPattern":"/login","allowedRequests":5,"windowSeconds":60,"active":true}"#;
        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.allowed_requests, 5);
        assert!(!rule.queue_enabled);
        assert!(rule.jwt_claims.is_empty());
    }

    #[test]
    fn global_rule_detection_trims_whitespace() {
        let mut rule = Rule {
            path_pattern: " /** ".to_string(),
            ..Rule::default()
        };
        assert!(rule.is_global());
        rule.path_pattern = "/api/**".to_string();
        assert!(!rule.is_global());
    }

    #[test]
    fn decision_serializes_kebab_case() {
        let json = serde_json::to_string(&Decision::RejectedByAntibot).unwrap();
        assert_eq!(json, "\"rejected-by-antibot\"");
        assert!(Decision::Queued.is_admitted());
        assert!(!Decision::Blocked.is_admitted());
    }

    #[test]
    fn body_content_type_uses_kebab_case() {
        let json = serde_json::to_string(&BodyContentType::FormUrlEncoded).unwrap();
        assert_eq!(json, "\"form-url-encoded\"");
    }
}
