//! Claim extraction from unverified JWTs.
//!
//! The gateway counts requests by claim values only; it never trusts them
//! for authorization, so the signature is deliberately not checked. A
//! forged claim only moves the forger onto a different counter.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use tracing::debug;

/// Extract the configured claims from a bearer token and join them.
///
/// Returns `None` when the token is not three dot-separated segments, the
/// payload is not a JSON object, or any configured claim is absent. String
/// claims are used verbatim, scalars are stringified, compound values are
/// re-serialized as JSON.
#[must_use]
pub fn extract_claims(auth_header: &str, claim_names: &[String], separator: &str) -> Option<String> {
    if claim_names.is_empty() {
        return None;
    }

    let token = strip_bearer(auth_header);
    if token.is_empty() {
        return None;
    }

    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        debug!("token has more than three segments");
        return None;
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    let claims = claims.as_object()?;

    let mut values = Vec::with_capacity(claim_names.len());
    for name in claim_names {
        let value = match claims.get(name) {
            Some(value) => claim_to_string(value)?,
            None => {
                debug!(claim = %name, "claim not present in token");
                return None;
            },
        };
        values.push(value);
    }

    Some(values.join(separator))
}

fn strip_bearer(header: &str) -> &str {
    let trimmed = header.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim(),
        _ => trimmed,
    }
}

fn claim_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        compound => serde_json::to_string(compound).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload);
        format!("{header}.{body}.sig")
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn extracts_and_joins_claims() {
        let auth = format!("Bearer {}", token(r#"{"sub":"u1","tenant":"t1"}"#));
        let id = extract_claims(&auth, &names(&["sub", "tenant"]), ":").unwrap();
        assert_eq!(id, "u1:t1");
    }

    #[test]
    fn bearer_prefix_is_optional_and_case_insensitive() {
        let raw = token(r#"{"sub":"u1"}"#);
        assert_eq!(extract_claims(&raw, &names(&["sub"]), ":").unwrap(), "u1");

        let lower = format!("bearer {raw}");
        assert_eq!(extract_claims(&lower, &names(&["sub"]), ":").unwrap(), "u1");
    }

    #[test]
    fn missing_claim_fails_the_whole_source() {
        let auth = token(r#"{"sub":"u1"}"#);
        assert!(extract_claims(&auth, &names(&["sub", "tenant"]), ":").is_none());
    }

    #[test]
    fn numeric_and_boolean_claims_are_stringified() {
        let auth = token(r#"{"uid":42,"admin":false}"#);
        let id = extract_claims(&auth, &names(&["uid", "admin"]), "/").unwrap();
        assert_eq!(id, "42/false");
    }

    #[test]
    fn compound_claims_are_serialized() {
        let auth = token(r#"{"roles":["a","b"]}"#);
        let id = extract_claims(&auth, &names(&["roles"]), ":").unwrap();
        assert_eq!(id, r#"["a","b"]"#);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(extract_claims("", &names(&["sub"]), ":").is_none());
        assert!(extract_claims("Bearer onlyonepart", &names(&["sub"]), ":").is_none());
        assert!(extract_claims("Bearer a.b", &names(&["sub"]), ":").is_none());
        assert!(extract_claims("Bearer a.!!!.c", &names(&["sub"]), ":").is_none());
        assert!(extract_claims("Bearer a.b.c.d", &names(&["sub"]), ":").is_none());
    }

    #[test]
    fn empty_claim_list_never_matches() {
        let auth = token(r#"{"sub":"u1"}"#);
        assert!(extract_claims(&auth, &[], ":").is_none());
    }

    #[test]
    fn padded_base64_payload_is_accepted() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let body = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"u1"}"#);
        let auth = format!("{header}.{body}.sig");
        assert_eq!(extract_claims(&auth, &names(&["sub"]), ":").unwrap(), "u1");
    }
}
