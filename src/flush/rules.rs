//! Flush rule table.
//!
//! Rules are configured as `<trigger-pattern>=<flush-path>[&<flush-path>...]`
//! strings and turned into an insertion-ordered table. Pattern compilation
//! is left to [`super::matcher`].

use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

const ENTRY_SEPARATOR: char = '=';
const TARGET_SEPARATOR: char = '&';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// The value side of a rule produced no flush target.
    #[error("malformed flush rule `{pattern}`: `{value}` yields no flush target")]
    Malformed { pattern: String, value: String },
    #[error("flush rule with value `{value}` has an empty trigger pattern")]
    EmptyPattern { value: String },
}

/// One trigger pattern and the paths flushed when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRule {
    trigger_pattern: String,
    targets: Vec<String>,
}

impl FlushRule {
    pub fn trigger_pattern(&self) -> &str {
        &self.trigger_pattern
    }

    /// Flush target templates, never empty.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl fmt::Display for FlushRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.trigger_pattern, self.targets.join(" & "))
    }
}

/// Insertion-ordered mapping from trigger pattern to flush targets.
///
/// Built once per activation and replaced wholesale on reconfiguration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<FlushRule>,
}

impl RuleTable {
    /// Build the table from `(pattern, value)` entries.
    ///
    /// Keys are trimmed; values are trimmed and split on `&`. A later entry
    /// for an already seen pattern replaces its targets in place.
    pub fn build<I, K, V>(entries: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut rules: Vec<FlushRule> = Vec::new();

        for (key, value) in entries {
            let pattern = key.as_ref().trim();
            let value = value.as_ref().trim();

            if pattern.is_empty() {
                return Err(RuleError::EmptyPattern {
                    value: value.to_string(),
                });
            }

            let targets = split_targets(value);
            if targets.is_empty() {
                return Err(RuleError::Malformed {
                    pattern: pattern.to_string(),
                    value: value.to_string(),
                });
            }

            match rules.iter_mut().find(|rule| rule.trigger_pattern == pattern) {
                Some(existing) => {
                    debug!(pattern, "Duplicate flush rule replaces earlier targets");
                    existing.targets = targets;
                }
                None => rules.push(FlushRule {
                    trigger_pattern: pattern.to_string(),
                    targets,
                }),
            }
        }

        Ok(Self { rules })
    }

    /// Parse raw configuration strings and build the table.
    pub fn from_config_entries<S: AsRef<str>>(raw: &[S]) -> Result<Self, RuleError> {
        Self::build(split_entries(raw))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlushRule> {
        self.rules.iter()
    }

    pub fn get(&self, pattern: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|rule| rule.trigger_pattern == pattern)
            .map(FlushRule::targets)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(FlushRule::trigger_pattern)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleTable {
    type Item = &'a FlushRule;
    type IntoIter = std::slice::Iter<'a, FlushRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// Split raw `key=value` strings on their first `=`.
///
/// Strings without a separator, or with nothing before it, are skipped.
pub fn split_entries<S: AsRef<str>>(raw: &[S]) -> Vec<(String, String)> {
    raw.iter()
        .filter_map(|entry| {
            let entry = entry.as_ref();
            match entry.split_once(ENTRY_SEPARATOR) {
                Some((key, value)) if !key.trim().is_empty() => {
                    Some((key.to_string(), value.to_string()))
                }
                _ => {
                    warn!(entry, "Ignoring flush rule without `pattern=path` form");
                    None
                }
            }
        })
        .collect()
}

fn split_targets(value: &str) -> Vec<String> {
    value
        .split(TARGET_SEPARATOR)
        .map(str::trim)
        .filter(|target| !target.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_targets_and_trims_everything() {
        let table = RuleTable::from_config_entries(&[" A = B & C "]).expect("valid rule");

        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("A"),
            Some(["B".to_string(), "C".to_string()].as_slice())
        );
    }

    #[test]
    fn keeps_insertion_order() {
        let table = RuleTable::from_config_entries(&[
            "/content/b/*=/content/b",
            "/content/a/*=/content/a",
            "/content/c/*=/content/c",
        ])
        .expect("valid rules");

        let patterns: Vec<&str> = table.patterns().collect();
        assert_eq!(patterns, ["/content/b/*", "/content/a/*", "/content/c/*"]);
    }

    #[test]
    fn duplicate_pattern_replaces_targets_in_place() {
        let table = RuleTable::from_config_entries(&["/a=/x", "/b=/y", " /a =/z"])
            .expect("valid rules");

        let rules: Vec<String> = table.iter().map(ToString::to_string).collect();
        assert_eq!(rules, ["/a => /z", "/b => /y"]);
    }

    #[test]
    fn value_is_split_on_first_equals_only() {
        let table =
            RuleTable::from_config_entries(&["/content/*=/flush?x=1"]).expect("valid rule");

        assert_eq!(
            table.get("/content/*"),
            Some(["/flush?x=1".to_string()].as_slice())
        );
    }

    #[test]
    fn entries_without_separator_are_skipped() {
        let table = RuleTable::from_config_entries(&["no-separator", "=/orphan", "/a=/b"])
            .expect("valid rules");

        assert_eq!(table.len(), 1);
        assert!(table.get("/a").is_some());
    }

    #[test]
    fn empty_tokens_are_dropped() {
        let table = RuleTable::from_config_entries(&["/a=/x&&/y&"]).expect("valid rule");

        assert_eq!(
            table.get("/a"),
            Some(["/x".to_string(), "/y".to_string()].as_slice())
        );
    }

    #[test]
    fn value_without_targets_is_malformed() {
        let err = RuleTable::from_config_entries(&["/a= & "]).expect_err("no targets");

        assert_eq!(
            err,
            RuleError::Malformed {
                pattern: "/a".to_string(),
                value: "&".to_string(),
            }
        );
    }

    #[test]
    fn blank_key_is_rejected_by_builder() {
        let err = RuleTable::build([("  ", "/x")]).expect_err("blank key");
        assert!(matches!(err, RuleError::EmptyPattern { .. }));
    }

    #[test]
    fn empty_configuration_yields_empty_table() {
        let table = RuleTable::from_config_entries::<&str>(&[]).expect("empty is legal");
        assert!(table.is_empty());
    }
}
