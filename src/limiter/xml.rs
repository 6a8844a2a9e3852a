//! Element-path extraction from XML bodies.
//!
//! A single-pass scanner that understands just enough XML to pull the text
//! content of one element. Documents containing a DOCTYPE are rejected
//! before parsing and no entity other than the five predefined ones is ever
//! resolved, so external-entity expansion is impossible by construction.
//!
//! Path forms: `/root/field` matches from the document root, `//field` (or
//! a bare `field`) matches at any depth, `//user/id` matches any `id` whose
//! parent is `user`. The first match wins and its full text content,
//! including nested elements, is returned.

use tracing::debug;

/// Extract the text content of the element addressed by `path`.
#[must_use]
pub fn extract(body: &[u8], path: &str) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;

    if contains_doctype(text) {
        debug!("rejecting XML body containing a DOCTYPE declaration");
        return None;
    }

    let target = Target::parse(path)?;
    let mut stack: Vec<String> = Vec::new();
    let mut capture: Option<(usize, String)> = None;

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'<' {
            let start = i;
            while i < bytes.len() && bytes[i] != b'<' {
                i += 1;
            }
            if let Some((_, buf)) = capture.as_mut() {
                buf.push_str(&text[start..i]);
            }
            continue;
        }

        // Comments, processing instructions, CDATA.
        if text[i..].starts_with("<!--") {
            i = text[i..].find("-->").map(|p| i + p + 3)?;
            continue;
        }
        if text[i..].starts_with("<![CDATA[") {
            let end = text[i..].find("]]>").map(|p| i + p)?;
            if let Some((_, buf)) = capture.as_mut() {
                buf.push_str(&text[i + 9..end]);
            }
            i = end + 3;
            continue;
        }
        if text[i..].starts_with("<?") {
            i = text[i..].find("?>").map(|p| i + p + 2)?;
            continue;
        }
        if text[i..].starts_with("<!") {
            // Any other declaration is unexpected once DOCTYPE is excluded.
            return None;
        }

        let close = find_tag_end(bytes, i + 1)?;
        let tag = &text[i + 1..close];

        if let Some(name) = tag.strip_prefix('/') {
            // Closing tag.
            let name = name.trim();
            if stack.last().is_some_and(|top| top.as_str() == name) {
                stack.pop();
            }
            if let Some((depth, buf)) = capture.as_ref() {
                if stack.len() < *depth {
                    return Some(decode_entities(buf.trim()));
                }
            }
        } else {
            let self_closing = tag.ends_with('/');
            let name = tag
                .trim_end_matches('/')
                .split([' ', '\t', '\r', '\n'])
                .next()
                .unwrap_or("")
                .trim();
            if name.is_empty() {
                return None;
            }

            stack.push(name.to_string());
            let matched = capture.is_none() && target.matches(&stack);
            if matched {
                if self_closing {
                    stack.pop();
                    return Some(String::new());
                }
                capture = Some((stack.len(), String::new()));
            } else if self_closing {
                stack.pop();
            }
        }

        i = close + 1;
    }

    None
}

/// Position of the `>` closing a tag, ignoring any `>` inside quoted
/// attribute values.
fn find_tag_end(bytes: &[u8], mut i: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (None, b'>') => return Some(i),
            (None, q @ (b'"' | b'\'')) => quote = Some(q),
            (Some(q), c) if c == q => quote = None,
            _ => {},
        }
        i += 1;
    }
    None
}

fn contains_doctype(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("<!doctype")
}

/// Parsed element path.
struct Target {
    segments: Vec<String>,
    anchored: bool,
}

impl Target {
    fn parse(path: &str) -> Option<Self> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (anchored, rest) = if let Some(rest) = trimmed.strip_prefix("//") {
            (false, rest)
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            (true, rest)
        } else {
            (false, trimmed)
        };

        let segments: Vec<String> = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return None;
        }

        Some(Self { segments, anchored })
    }

    fn matches(&self, stack: &[String]) -> bool {
        if self.anchored {
            stack == self.segments.as_slice()
        } else {
            stack.len() >= self.segments.len()
                && stack[stack.len() - self.segments.len()..] == self.segments[..]
        }
    }
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ if entity.starts_with('#') => {
                let code = entity.strip_prefix("#x").map_or_else(
                    || entity[1..].parse::<u32>().ok(),
                    |hex| u32::from_str_radix(hex, 16).ok(),
                );
                match code.and_then(char::from_u32) {
                    Some(c) => out.push(c),
                    None => out.push_str(&rest[..=end]),
                }
            },
            // Unknown entities stay literal; nothing is ever resolved.
            _ => out.push_str(&rest[..=end]),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_matches_anywhere() {
        let body = b"<order><user><id>alice</id></user></order>";
        assert_eq!(extract(body, "id").unwrap(), "alice");
        assert_eq!(extract(body, "//id").unwrap(), "alice");
    }

    #[test]
    fn anchored_path_matches_from_root() {
        let body = b"<root><api_key>k-123</api_key><nested><api_key>other</api_key></nested></root>";
        assert_eq!(extract(body, "/root/api_key").unwrap(), "k-123");
        assert!(extract(body, "/api_key").is_none());
    }

    #[test]
    fn parent_qualified_relative_path() {
        let body = b"<doc><user><id>u1</id></user><group><id>g1</id></group></doc>";
        assert_eq!(extract(body, "//group/id").unwrap(), "g1");
    }

    #[test]
    fn nested_text_is_concatenated() {
        let body = b"<root><name>Ada <b>Lovelace</b></name></root>";
        assert_eq!(extract(body, "//name").unwrap(), "Ada Lovelace");
    }

    #[test]
    fn doctype_is_rejected_outright() {
        let body = br#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<root><id>&xxe;</id></root>"#;
        assert!(extract(body, "//id").is_none());
    }

    #[test]
    fn unknown_entities_are_not_resolved() {
        let body = b"<root><id>a&custom;b</id></root>";
        assert_eq!(extract(body, "//id").unwrap(), "a&custom;b");
    }

    #[test]
    fn predefined_and_numeric_entities_decode() {
        let body = b"<root><v>a&amp;b &lt;x&gt; &#65;&#x42;</v></root>";
        assert_eq!(extract(body, "//v").unwrap(), "a&b <x> AB");
    }

    #[test]
    fn cdata_is_text() {
        let body = b"<root><v><![CDATA[raw <stuff> here]]></v></root>";
        assert_eq!(extract(body, "//v").unwrap(), "raw <stuff> here");
    }

    #[test]
    fn self_closing_and_attributes() {
        let body = br#"<root><empty/><v kind="primary">x</v></root>"#;
        assert_eq!(extract(body, "//empty").unwrap(), "");
        assert_eq!(extract(body, "//v").unwrap(), "x");
    }

    #[test]
    fn angle_bracket_inside_attribute_value() {
        let body = br#"<root><v note="a > b">x</v></root>"#;
        assert_eq!(extract(body, "//v").unwrap(), "x");
    }

    #[test]
    fn comments_are_skipped() {
        let body = b"<root><!-- <v>not this</v> --><v>yes</v></root>";
        assert_eq!(extract(body, "//v").unwrap(), "yes");
    }

    #[test]
    fn missing_element_and_garbage() {
        assert!(extract(b"<root><a>1</a></root>", "//b").is_none());
        assert!(extract(b"not xml at all", "//b").is_none());
        assert!(extract(b"<root><a>1</a></root>", "").is_none());
        assert!(extract(&[0xff, 0xfe], "//a").is_none());
    }
}
