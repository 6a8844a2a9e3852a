//! Field extraction from buffered request bodies.
//!
//! Supports the four body formats a rule can declare. Parsing failures
//! never surface to the client; the caller falls through to the next
//! identifier source.

use super::xml;
use crate::model::BodyContentType;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Extract a field value from a request body.
///
/// `declared` is the rule's content type; when absent, the request's
/// `Content-Type` header decides, defaulting to JSON.
#[must_use]
pub fn extract_field(
    body: &[u8],
    field_path: &str,
    declared: Option<BodyContentType>,
    header_content_type: Option<&str>,
) -> Option<String> {
    if body.is_empty() || field_path.trim().is_empty() {
        return None;
    }

    let content_type = declared.unwrap_or_else(|| classify(header_content_type));
    let value = match content_type {
        BodyContentType::Json => from_json(body, field_path),
        BodyContentType::FormUrlEncoded => from_form(body, field_path),
        BodyContentType::Xml => xml::extract(body, field_path),
        BodyContentType::Multipart => from_multipart(body, field_path, header_content_type?),
    };

    if value.is_none() {
        debug!(field = field_path, ?content_type, "body field not found");
    }
    value
}

/// Map a `Content-Type` header onto a body format, defaulting to JSON.
#[must_use]
pub fn classify(header: Option<&str>) -> BodyContentType {
    let Some(header) = header else {
        return BodyContentType::Json;
    };
    let mime = header.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if mime.contains("x-www-form-urlencoded") {
        BodyContentType::FormUrlEncoded
    } else if mime.contains("multipart/form-data") {
        BodyContentType::Multipart
    } else if mime.contains("xml") {
        BodyContentType::Xml
    } else {
        BodyContentType::Json
    }
}

/// Dot-path descent through a JSON document.
fn from_json(body: &[u8], field_path: &str) -> Option<String> {
    let root: Value = serde_json::from_slice(body).ok()?;

    let mut current = &root;
    for part in field_path.split('.') {
        current = current.get(part)?;
    }

    match current {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        compound => serde_json::to_string(compound).ok(),
    }
}

/// Name lookup in `application/x-www-form-urlencoded` data.
fn from_form(body: &[u8], field_name: &str) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    parse_form(text).remove(field_name)
}

fn parse_form(text: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in text.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        if let (Some(key), Some(value)) = (percent_decode(key), percent_decode(value)) {
            params.insert(key, value);
        }
    }
    params
}

/// Decode percent-escapes and `+` as space. Returns `None` on truncated or
/// non-UTF-8 escapes.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let hi = (hex[0] as char).to_digit(16)?;
                let lo = (hex[1] as char).to_digit(16)?;
                out.push((hi * 16 + lo) as u8);
                i += 2;
            },
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8(out).ok()
}

/// Text part lookup in `multipart/form-data`. File parts are ignored; only
/// the first matching part's text is returned.
fn from_multipart(body: &[u8], field_name: &str, content_type: &str) -> Option<String> {
    let boundary = boundary_of(content_type)?;
    let text = std::str::from_utf8(body).ok()?;
    let marker = format!("--{boundary}");
    let needle = format!("name=\"{field_name}\"");

    for part in text.split(marker.as_str()) {
        let part = part.trim_start_matches(['\r', '\n']);
        if part.is_empty() || part.starts_with("--") {
            continue;
        }

        let Some((headers, content)) = part
            .split_once("\r\n\r\n")
            .or_else(|| part.split_once("\n\n"))
        else {
            continue;
        };

        let disposition = headers
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with("content-disposition:"));
        if !disposition.is_some_and(|d| d.contains(needle.as_str())) {
            continue;
        }

        return Some(content.trim_end_matches(['\r', '\n']).to_string());
    }

    None
}

fn boundary_of(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let trimmed = part.trim();
        trimmed
            .strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}
