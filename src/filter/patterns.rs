//! Filter expression compilation
//!
//! The stored expression is a comma-separated list of regex fragments, e.g.
//! `Production.*, Staging.*`. Each fragment is trimmed and compiled
//! case-insensitively. Matching is unanchored and "any-of": a name is visible
//! if at least one fragment finds a match anywhere in it.

use regex::{Regex, RegexBuilder};

use super::FilterError;

/// Compiled, ordered set of environment name patterns
#[derive(Debug, Clone, Default)]
pub struct FilterPatterns {
    patterns: Vec<Regex>,
}

impl FilterPatterns {
    /// True when there is nothing to match against.
    ///
    /// Callers treat an empty set as "filtering disabled", never as "hide everything".
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Does `name` match at least one pattern?
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|rx| rx.is_match(name))
    }

    /// Source text of each pattern, in expression order
    pub fn sources(&self) -> Vec<&str> {
        self.patterns.iter().map(|rx| rx.as_str()).collect()
    }
}

/// Split the raw expression into trimmed, non-empty fragments
fn fragments(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|f| !f.is_empty())
}

fn compile_fragment(fragment: &str) -> Result<Regex, FilterError> {
    RegexBuilder::new(fragment)
        .case_insensitive(true)
        .build()
        .map_err(|source| FilterError::InvalidPattern {
            fragment: fragment.to_string(),
            source,
        })
}

/// Compile a filter expression, failing on the first invalid fragment
pub fn compile(raw: &str) -> Result<FilterPatterns, FilterError> {
    let patterns = fragments(raw)
        .map(compile_fragment)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FilterPatterns { patterns })
}

/// Compile every valid fragment, returning the rejected ones alongside
pub fn compile_lenient(raw: &str) -> (FilterPatterns, Vec<FilterError>) {
    let mut patterns = Vec::new();
    let mut errors = Vec::new();

    for fragment in fragments(raw) {
        match compile_fragment(fragment) {
            Ok(rx) => patterns.push(rx),
            Err(e) => errors.push(e),
        }
    }

    (FilterPatterns { patterns }, errors)
}
