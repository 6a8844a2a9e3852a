//! Ant-style glob matching for path patterns and host filters.
//!
//! Semantics: `?` matches one character within a segment, `*` matches any
//! run of characters within a segment, `**` matches across segments. A
//! trailing `/**` also matches the bare prefix itself, so `/api/**` matches
//! `/api` as well as `/api/a/b`.

use regex::Regex;

/// A compiled ant-style glob.
#[derive(Debug, Clone)]
pub struct AntGlob {
    pattern: String,
    regex: Regex,
}

impl AntGlob {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns the regex error if the translated pattern fails to compile;
    /// in practice this only happens on pathological input sizes.
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&translate(pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Whether `input` matches the whole pattern.
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// The source pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Translate an ant glob into an anchored regex.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 16);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_end = i + 2 == chars.len();
                if at_end && i > 0 && chars[i - 1] == '/' {
                    // "prefix/**": the '/' was already emitted; rewrite so the
                    // bare prefix matches too.
                    out.truncate(out.len() - 1);
                    out.push_str("(?:/.*)?");
                } else if chars.get(i + 2) == Some(&'/') {
                    // "**/": zero or more whole segments.
                    out.push_str("(?:.*/)?");
                    i += 3;
                    continue;
                } else {
                    out.push_str(".*");
                }
                i += 2;
                continue;
            },
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => {
                if regex_syntax_char(c) {
                    out.push('\\');
                }
                out.push(c);
            },
        }
        i += 1;
    }

    out.push('$');
    out
}

fn regex_syntax_char(c: char) -> bool {
    matches!(
        c,
        '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\'
    )
}
