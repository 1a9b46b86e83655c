//! Trigger pattern matching.
//!
//! A trigger pattern is a content path in which `*` stands for any run of
//! characters, slashes included. Every other character is literal and the
//! whole path must match. Each `*` becomes a positional capture that flush
//! target templates can reference as `$1`, `${1}`, ... (`$0` is the full
//! path, `$$` a literal dollar sign).

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use thiserror::Error;

use super::lock::RecoverPoisoned;

const SOURCE: &str = "flush::matcher";
const WILDCARD: char = '*';
const PATTERN_CACHE_MAX: usize = 1024;

static PATTERN_CACHE: OnceLock<RwLock<HashMap<String, PathPattern>>> = OnceLock::new();

#[derive(Debug, Error)]
#[error("invalid trigger pattern `{pattern}`: {source}")]
pub struct PatternError {
    pattern: String,
    #[source]
    source: regex::Error,
}

/// A compiled trigger pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    regex: Regex,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let body = pattern
            .split(WILDCARD)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("(.*)");
        let regex = Regex::new(&format!("^{body}$")).map_err(|source| PatternError {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Number of wildcard captures in the pattern.
    pub fn capture_count(&self) -> usize {
        self.regex.captures_len() - 1
    }

    /// Match `path` against the whole pattern.
    pub fn matches(&self, path: &str) -> Option<PathMatch> {
        let captures = self.regex.captures(path)?;
        let groups = captures
            .iter()
            .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
            .collect();
        Some(PathMatch { groups })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Match `path` against `pattern`, reusing previously compiled patterns.
pub fn match_path(pattern: &str, path: &str) -> Result<Option<PathMatch>, PatternError> {
    Ok(cached_pattern(pattern)?.matches(path))
}

fn cached_pattern(pattern: &str) -> Result<PathPattern, PatternError> {
    let cache = PATTERN_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(compiled) = cache.read_or_recover(SOURCE, "cached_pattern").get(pattern) {
        return Ok(compiled.clone());
    }

    let compiled = PathPattern::compile(pattern)?;

    let mut guard = cache.write_or_recover(SOURCE, "cached_pattern");
    if guard.len() >= PATTERN_CACHE_MAX {
        guard.clear();
    }
    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());

    Ok(compiled)
}

/// Result of a successful match: the full path and the text of each wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    groups: Vec<String>,
}

impl PathMatch {
    pub fn path(&self) -> &str {
        &self.groups[0]
    }

    /// Wildcard captures, in pattern order.
    pub fn captures(&self) -> &[String] {
        &self.groups[1..]
    }

    /// Substitute capture references in `template`.
    ///
    /// References to captures that do not exist expand to nothing.
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            rest = &rest[pos + 1..];

            if let Some(after) = rest.strip_prefix('$') {
                out.push('$');
                rest = after;
                continue;
            }

            let (digits, remainder, braced) = match rest.strip_prefix('{') {
                Some(inner) => match inner.find('}') {
                    Some(end) => (&inner[..end], &inner[end + 1..], true),
                    None => ("", rest, true),
                },
                None => {
                    let end = rest
                        .find(|c: char| !c.is_ascii_digit())
                        .unwrap_or(rest.len());
                    (&rest[..end], &rest[end..], false)
                }
            };

            match digits.parse::<usize>() {
                Ok(index) if !digits.is_empty() => {
                    if let Some(group) = self.groups.get(index) {
                        out.push_str(group);
                    }
                    rest = remainder;
                }
                _ => {
                    out.push('$');
                    if braced && remainder.len() != rest.len() {
                        out.push('{');
                        out.push_str(digits);
                        out.push('}');
                        rest = remainder;
                    }
                }
            }
        }

        out.push_str(rest);
        out
    }
}
