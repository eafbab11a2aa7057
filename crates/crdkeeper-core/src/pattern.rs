//! CRD selection patterns
//!
//! A pattern specification is a `;`-separated list of glob patterns matched
//! case-insensitively against CRD names, for example
//! `widgets.example.com;*.storage.example.com`.
//!
//! Matching is two-phase: every candidate is evaluated first, marking each
//! pattern that matched, and [`PatternMatcher::validate_all_used`] runs
//! afterwards so a single error can list every pattern that selected nothing.

use glob::{MatchOptions, Pattern};

use crate::error::{CoreError, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Outcome of matching one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    /// The first pattern (in specification order) that matched
    pub matching_pattern: Option<String>,
}

#[derive(Debug)]
struct TrackedPattern {
    pattern: Pattern,
    matched: bool,
}

/// Matches candidate names against a pattern specification
#[derive(Debug)]
pub struct PatternMatcher {
    patterns: Vec<TrackedPattern>,
}

impl PatternMatcher {
    /// Parse a pattern specification
    ///
    /// Blank clauses are ignored; a clause that is not a valid glob is an error.
    pub fn new(spec: &str) -> Result<Self> {
        let patterns = spec
            .split(';')
            .map(str::trim)
            .filter(|clause| !clause.is_empty())
            .map(|clause| {
                Pattern::new(clause)
                    .map(|pattern| TrackedPattern {
                        pattern,
                        matched: false,
                    })
                    .map_err(|e| CoreError::InvalidPattern {
                        pattern: clause.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    /// Whether the specification contains no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Match one candidate, marking every pattern it satisfies
    pub fn matches(&mut self, candidate: &str) -> MatchResult {
        let mut first = None;
        for tracked in &mut self.patterns {
            if tracked.pattern.matches_with(candidate, MATCH_OPTIONS) {
                tracked.matched = true;
                first.get_or_insert_with(|| tracked.pattern.as_str().to_string());
            }
        }

        MatchResult {
            matched: first.is_some(),
            matching_pattern: first,
        }
    }

    /// Match every candidate, returning `(candidate, pattern)` for each match
    pub fn evaluate<'a, I>(&mut self, candidates: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .filter_map(|candidate| {
                self.matches(candidate)
                    .matching_pattern
                    .map(|pattern| (candidate.to_string(), pattern))
            })
            .collect()
    }

    /// Patterns that have not matched any candidate so far
    pub fn unmatched(&self) -> Vec<&str> {
        self.patterns
            .iter()
            .filter(|t| !t.matched)
            .map(|t| t.pattern.as_str())
            .collect()
    }

    /// Fail if any pattern did not match at least one candidate
    pub fn validate_all_used(&self) -> Result<()> {
        let unmatched = self.unmatched();
        if unmatched.is_empty() {
            return Ok(());
        }

        Err(CoreError::UnmatchedPatterns {
            patterns: unmatched.into_iter().map(String::from).collect(),
        })
    }
}
