//! Write-request validation: honeypot, submit timing, one-time tokens and
//! idempotency keys.

use super::cache::TtlCache;
use crate::settings::SettingsService;
use chrono::Utc;
use http::header::COOKIE;
use http::HeaderMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Header carrying the one-time form token.
pub const FORM_TOKEN_HEADER: &str = "X-Form-Token";
/// Header carrying the form render timestamp (milliseconds since epoch).
pub const FORM_LOAD_TIME_HEADER: &str = "X-Form-Load-Time";
/// Honeypot header; humans leave it empty, naive bots fill it.
pub const HONEYPOT_HEADER: &str = "X-Honeypot";
/// Client-chosen duplicate-suppression key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "X-Idempotency-Key";
/// Cookie fallback for the form token, set by the challenge flows.
pub const TOKEN_CHALLENGE_COOKIE: &str = "X-Form-Token-Challenge";

/// Issued tokens stay redeemable this long.
pub const TOKEN_TTL: Duration = Duration::from_secs(600);
/// Redeemed tokens are remembered this long to catch replays.
const USED_TOKEN_TTL: Duration = Duration::from_secs(900);
/// Idempotency keys suppress duplicates this long.
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(3600);
/// Hard cap per cache.
const CACHE_CAPACITY: usize = 100_000;

/// Why a write request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotRejection {
    /// The honeypot header was filled in.
    Honeypot,
    /// The form was submitted faster than a human could.
    TooFast,
    /// The token is unknown or expired.
    InvalidToken,
    /// The token was already redeemed.
    ReusedToken,
    /// The idempotency key was already seen.
    Duplicate,
}

impl BotRejection {
    /// Value for the rejection-reason response header.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::Honeypot => "honeypot",
            Self::TooFast => "too-fast",
            Self::InvalidToken => "invalid-token",
            Self::ReusedToken => "reused-token",
            Self::Duplicate => "duplicate",
        }
    }

    /// HTTP status the rejection maps to.
    #[must_use]
    pub fn status(self) -> u16 {
        match self {
            Self::Duplicate => 409,
            _ => 403,
        }
    }
}

/// A freshly issued one-time token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// Opaque token value.
    pub token: String,
    /// Issuance time, milliseconds since epoch.
    pub load_time: i64,
    /// Name of the honeypot form field the UI should render.
    pub honeypot_field: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
}

/// Counters for validator observability.
#[derive(Debug, Default)]
pub struct AntiBotStats {
    /// Write requests validated.
    pub requests_validated: AtomicU64,
    /// Requests refused.
    pub requests_rejected: AtomicU64,
    /// Tokens issued.
    pub tokens_issued: AtomicU64,
}

/// Validates write requests and issues one-time tokens.
pub struct AntiBotValidator {
    settings: Arc<SettingsService>,
    valid_tokens: TtlCache<String, i64>,
    used_tokens: TtlCache<String, ()>,
    idempotency_keys: TtlCache<String, ()>,
    stats: AntiBotStats,
}

impl std::fmt::Debug for AntiBotValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntiBotValidator")
            .field("valid_tokens", &self.valid_tokens.len())
            .field("used_tokens", &self.used_tokens.len())
            .field("idempotency_keys", &self.idempotency_keys.len())
            .finish()
    }
}

impl AntiBotValidator {
    /// Create a validator reading its thresholds from `settings`.
    #[must_use]
    pub fn new(settings: Arc<SettingsService>) -> Self {
        Self {
            settings,
            valid_tokens: TtlCache::new(CACHE_CAPACITY, TOKEN_TTL),
            used_tokens: TtlCache::new(CACHE_CAPACITY, USED_TOKEN_TTL),
            idempotency_keys: TtlCache::new(CACHE_CAPACITY, IDEMPOTENCY_TTL),
            stats: AntiBotStats::default(),
        }
    }

    /// Observability counters.
    #[must_use]
    pub fn stats(&self) -> &AntiBotStats {
        &self.stats
    }

    /// Issue a fresh one-time token.
    pub async fn issue_token(&self) -> IssuedToken {
        let token = Uuid::new_v4().to_string();
        let load_time = Utc::now().timestamp_millis();
        self.valid_tokens.insert(token.clone(), load_time);
        self.stats.tokens_issued.fetch_add(1, Ordering::Relaxed);

        IssuedToken {
            token,
            load_time,
            honeypot_field: self.settings.get_str("antibot-honeypot-field", "_hp_email").await,
            expires_in: TOKEN_TTL.as_secs(),
        }
    }

    /// Validate a write request. `Ok(())` admits it; on success the token
    /// is invalidated and the idempotency key recorded.
    pub async fn validate(&self, headers: &HeaderMap, client_ip: &str) -> Result<(), BotRejection> {
        self.stats.requests_validated.fetch_add(1, Ordering::Relaxed);
        let result = self.run_checks(headers, client_ip).await;
        if result.is_err() {
            self.stats.requests_rejected.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn run_checks(&self, headers: &HeaderMap, client_ip: &str) -> Result<(), BotRejection> {
        if let Some(honeypot) = header_str(headers, HONEYPOT_HEADER) {
            if !honeypot.is_empty() {
                warn!(client_ip, "honeypot header filled");
                return Err(BotRejection::Honeypot);
            }
        }

        if let Some(load_time) = header_str(headers, FORM_LOAD_TIME_HEADER) {
            match load_time.parse::<i64>() {
                Ok(loaded_at) => {
                    let elapsed = Utc::now().timestamp_millis() - loaded_at;
                    let min = self.settings.get_i64("antibot-min-submit-time", 2000).await;
                    if elapsed < min {
                        warn!(client_ip, elapsed, min, "form submitted too fast");
                        return Err(BotRejection::TooFast);
                    }
                },
                Err(_) => warn!(client_ip, "unparsable form load time"),
            }
        }

        let token = header_str(headers, FORM_TOKEN_HEADER)
            .map(str::to_string)
            .or_else(|| cookie_value(headers, TOKEN_CHALLENGE_COOKIE));
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            debug!(client_ip, "write request without a form token");
            return Err(BotRejection::InvalidToken);
        };

        if self.used_tokens.contains(&token) {
            warn!(client_ip, "form token replayed");
            return Err(BotRejection::ReusedToken);
        }
        if self.valid_tokens.remove(&token).is_none() {
            warn!(client_ip, "unknown or expired form token");
            return Err(BotRejection::InvalidToken);
        }
        self.used_tokens.insert(token, ());

        if let Some(key) = header_str(headers, IDEMPOTENCY_KEY_HEADER) {
            if !key.is_empty() {
                if self.idempotency_keys.contains(&key.to_string()) {
                    info!(client_ip, key, "duplicate request suppressed");
                    return Err(BotRejection::Duplicate);
                }
                self.idempotency_keys.insert(key.to_string(), ());
            }
        }

        Ok(())
    }

    /// Drop expired cache entries; called from a periodic task.
    pub fn purge_expired(&self) {
        self.valid_tokens.purge_expired();
        self.used_tokens.purge_expired();
        self.idempotency_keys.purge_expired();
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(text) = header.to_str() else {
            continue;
        };
        for pair in text.split(';') {
            if let Some((key, value)) = pair.split_once('=') {
                if key.trim() == name && !value.trim().is_empty() {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}
