//! String match groups: literal value sets plus ordered regex lists.

use ahash::{AHashMap, AHashSet};
use regex::Regex;

use crate::error::{Error, Result};

/// Two-level string matcher: a named group maps to a set of literal values
/// and a list of compiled regular expressions.
///
/// Literal membership is exact and case-sensitive; regexes are tried in
/// insertion order after the literal set misses.
#[derive(Default)]
pub struct StringMatchTable {
    groups: AHashMap<String, MatchGroup>,
}

#[derive(Default)]
struct MatchGroup {
    values: AHashSet<String>,
    patterns: Vec<Regex>,
}

impl StringMatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the table holds no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Add a literal value to `group`. Values behave as a set; adding a
    /// duplicate is a no-op.
    pub fn add_value(&mut self, group: &str, value: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .values
            .insert(value.to_string());
    }

    /// Compile `pattern` and append it to `group`'s regex list.
    ///
    /// A pattern that fails to compile is reported and discarded; the group
    /// keeps whatever it held before.
    pub fn add_regex(&mut self, group: &str, pattern: &str) -> Result<()> {
        let compiled = Regex::new(pattern).map_err(|source| Error::InvalidRegex {
            group: group.to_string(),
            source,
        })?;
        self.groups
            .entry(group.to_string())
            .or_default()
            .patterns
            .push(compiled);
        Ok(())
    }

    /// Whether `value` matches `group`: literal membership first, then each
    /// regex in insertion order, first match wins. An unknown group never
    /// matches and is not an error.
    pub fn matches(&self, group: &str, value: &str) -> bool {
        let g = match self.groups.get(group) {
            Some(g) => g,
            None => return false,
        };
        if g.values.contains(value) {
            return true;
        }
        g.patterns.iter().any(|re| re.is_match(value))
    }

    /// Whether `group` carries at least one regex.
    pub fn has_regex(&self, group: &str) -> bool {
        self.groups
            .get(group)
            .map_or(false, |g| !g.patterns.is_empty())
    }
}
