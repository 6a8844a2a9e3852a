//! Maps a request to the identifier its counters are keyed by.
//!
//! Source priority is fixed: header > cookie > body field > JWT claims >
//! client IP. A source that is enabled but yields nothing falls through to
//! the next one, ending at the IP.

use super::{body, jwt};
use crate::model::{LimitMode, Rule};
use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use http::HeaderMap;
use tracing::debug;

/// The request facts identifier resolution reads.
#[derive(Debug, Clone, Copy)]
pub struct RequestIdentity<'a> {
    /// Request headers.
    pub headers: &'a HeaderMap,
    /// Client address, the ultimate fallback identifier.
    pub client_ip: &'a str,
    /// Buffered body for write requests.
    pub body: Option<&'a [u8]>,
}

/// Resolve the identifier for one rule.
#[must_use]
pub fn resolve(rule: &Rule, identity: &RequestIdentity<'_>) -> String {
    if rule.header_limit_enabled {
        if let Some(name) = non_blank(rule.header_name.as_deref()) {
            if let Some(value) = header_value(identity.headers, name) {
                debug!(header = name, "identifier from header");
                return combine(rule.header_limit_type, identity.client_ip, &value);
            }
            debug!(header = name, "header absent or empty, falling through");
        }
    }

    if rule.cookie_limit_enabled {
        if let Some(name) = non_blank(rule.cookie_name.as_deref()) {
            if let Some(value) = cookie_value(identity.headers, name) {
                debug!(cookie = name, "identifier from cookie");
                return combine(rule.cookie_limit_type, identity.client_ip, &value);
            }
            debug!(cookie = name, "cookie absent or empty, falling through");
        }
    }

    if rule.body_limit_enabled {
        if let Some(path) = non_blank(rule.body_field_path.as_deref()) {
            let extracted = identity.body.and_then(|bytes| {
                body::extract_field(
                    bytes,
                    path,
                    rule.body_content_type,
                    header_value(identity.headers, CONTENT_TYPE.as_str()).as_deref(),
                )
            });
            match extracted.filter(|v| !v.trim().is_empty()) {
                Some(value) => {
                    debug!(field = path, "identifier from body field");
                    return combine(rule.body_limit_type, identity.client_ip, &value);
                },
                None => debug!(field = path, "body field absent, falling through"),
            }
        }
    }

    if rule.jwt_enabled && !rule.jwt_claims.is_empty() {
        let separator = rule.jwt_claim_separator.as_deref().unwrap_or(":");
        let claims = header_value(identity.headers, AUTHORIZATION.as_str())
            .and_then(|auth| jwt::extract_claims(&auth, &rule.jwt_claims, separator));
        match claims {
            Some(value) => {
                debug!("identifier from JWT claims");
                return value;
            },
            None => debug!("JWT claims unavailable, falling back to IP"),
        }
    }

    identity.client_ip.to_string()
}

fn combine(mode: Option<LimitMode>, client_ip: &str, value: &str) -> String {
    match mode.unwrap_or_default() {
        LimitMode::ReplaceIp => value.to_string(),
        LimitMode::CombineWithIp => format!("{client_ip}:{value}"),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First matching cookie value across all `Cookie` headers.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(text) = header.to_str() else {
            continue;
        };
        for pair in text.split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            if key.trim() == name && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}
