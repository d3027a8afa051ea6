//! Filter engine
//!
//! Derives the filtered index sequence from a candidate sequence using a
//! global search term and one search term per column. Terms are matched
//! against normalized row text; how text is normalized is a policy
//! ([`TextNormalizer`]) so case and accent handling can be swapped out.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::data::datatable::ColumnSet;
use crate::data::row_store::RowStore;
use crate::error::{ViewError, ViewResult};

/// Text normalization applied to both row text and literal search terms
pub trait TextNormalizer: fmt::Debug + Send + Sync {
    fn normalize(&self, text: &str) -> String;

    /// Whether regex terms should be compiled case-insensitively
    fn case_insensitive(&self) -> bool {
        false
    }
}

/// Lower-cases text and flattens line breaks
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseFold;

impl TextNormalizer for CaseFold {
    fn normalize(&self, text: &str) -> String {
        text.replace(['\n', '\r'], " ").to_lowercase()
    }

    fn case_insensitive(&self) -> bool {
        true
    }
}

/// Keeps case, only flattens line breaks
#[derive(Debug, Clone, Copy, Default)]
pub struct Exact;

impl TextNormalizer for Exact {
    fn normalize(&self, text: &str) -> String {
        text.replace(['\n', '\r'], " ")
    }
}

/// One search scope: the global search or a single column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    pub term: String,
    /// Treat the term as a regular expression
    pub regex: bool,
    /// Split on whitespace and require every token
    pub smart: bool,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            term: String::new(),
            regex: false,
            smart: true,
        }
    }
}

impl SearchCriteria {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Self::default()
        }
    }

    pub fn with_regex(mut self, regex: bool) -> Self {
        self.regex = regex;
        self
    }

    pub fn with_smart(mut self, smart: bool) -> Self {
        self.smart = smart;
        self
    }

    /// An empty scope matches every row
    pub fn is_empty(&self) -> bool {
        self.term.trim().is_empty()
    }

    /// True when `self` can only match a subset of what `previous` matched,
    /// so filtering may start from the previous result
    pub fn narrows(&self, previous: &SearchCriteria) -> bool {
        !self.regex
            && !previous.regex
            && self.smart == previous.smart
            && self.term.len() > previous.term.len()
            && self.term.starts_with(previous.term.as_str())
    }
}

#[derive(Debug)]
enum Matcher {
    All,
    Nothing,
    Patterns(Vec<Regex>),
}

impl Matcher {
    fn compile(criteria: &SearchCriteria, normalizer: &dyn TextNormalizer) -> (Self, Option<ViewError>) {
        if criteria.is_empty() {
            return (Matcher::All, None);
        }

        let pieces: Vec<&str> = if criteria.smart {
            criteria.term.split_whitespace().collect()
        } else {
            vec![criteria.term.as_str()]
        };

        let mut patterns = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let source = if criteria.regex {
                piece.to_string()
            } else {
                regex::escape(&normalizer.normalize(piece))
            };
            match RegexBuilder::new(&source)
                .case_insensitive(normalizer.case_insensitive())
                .build()
            {
                Ok(regex) => patterns.push(regex),
                Err(e) => {
                    warn!(target: "FilterEngine", "Invalid search pattern '{}': {}", criteria.term, e);
                    return (
                        Matcher::Nothing,
                        Some(ViewError::invalid_pattern(criteria.term.clone(), e)),
                    );
                }
            }
        }
        (Matcher::Patterns(patterns), None)
    }

    fn is_all(&self) -> bool {
        matches!(self, Matcher::All)
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::All => true,
            Matcher::Nothing => false,
            Matcher::Patterns(patterns) => patterns.iter().all(|p| p.is_match(text)),
        }
    }
}

/// Result of one filter pass
#[derive(Debug, Clone, Default)]
pub struct FilterPass {
    /// Surviving identities, relative order of the input preserved
    pub display: Vec<usize>,
    /// Search text per surviving row, aligned with `display`
    pub search_cache: Vec<String>,
    /// Patterns that failed to compile; their scope matched nothing
    pub errors: Vec<ViewError>,
}

pub struct FilterEngine<'a> {
    columns: &'a ColumnSet,
    normalizer: &'a dyn TextNormalizer,
}

impl<'a> FilterEngine<'a> {
    pub fn new(columns: &'a ColumnSet, normalizer: &'a dyn TextNormalizer) -> Self {
        Self {
            columns,
            normalizer,
        }
    }

    fn compile_all(
        &self,
        global: &SearchCriteria,
        per_column: &[SearchCriteria],
    ) -> (Matcher, Vec<(usize, Matcher)>, Vec<ViewError>) {
        let mut errors = Vec::new();
        let (global_matcher, error) = Matcher::compile(global, self.normalizer);
        errors.extend(error);

        let mut column_matchers = Vec::new();
        for (column, criteria) in per_column.iter().enumerate().take(self.columns.len()) {
            let (matcher, error) = Matcher::compile(criteria, self.normalizer);
            errors.extend(error);
            if !matcher.is_all() {
                column_matchers.push((column, matcher));
            }
        }
        (global_matcher, column_matchers, errors)
    }

    fn columns_match(
        &self,
        store: &mut RowStore,
        index: usize,
        matchers: &[(usize, Matcher)],
    ) -> ViewResult<bool> {
        for (column, matcher) in matchers {
            let text = store.column_text(index, *column, self.columns, self.normalizer)?;
            if !matcher.is_match(&text) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Full pass over `candidates`, computing search text from the store
    pub fn run(
        &self,
        store: &mut RowStore,
        candidates: &[usize],
        global: &SearchCriteria,
        per_column: &[SearchCriteria],
    ) -> ViewResult<FilterPass> {
        let (global_matcher, column_matchers, errors) = self.compile_all(global, per_column);
        let mut pass = FilterPass {
            errors,
            ..FilterPass::default()
        };

        for &index in candidates {
            let text = store.search_text(index, self.columns, self.normalizer)?;
            if global_matcher.is_match(&text) && self.columns_match(store, index, &column_matchers)? {
                pass.display.push(index);
                pass.search_cache.push(text);
            }
        }

        debug!(
            target: "FilterEngine",
            "Full filter '{}' kept {}/{} rows",
            global.term,
            pass.display.len(),
            candidates.len()
        );
        Ok(pass)
    }

    /// Narrowing pass over an existing display order, reusing its aligned search cache
    pub fn narrow(
        &self,
        store: &mut RowStore,
        current: &[usize],
        search_cache: &[String],
        global: &SearchCriteria,
        per_column: &[SearchCriteria],
    ) -> ViewResult<FilterPass> {
        let (global_matcher, column_matchers, errors) = self.compile_all(global, per_column);
        let mut pass = FilterPass {
            errors,
            ..FilterPass::default()
        };

        for (&index, text) in current.iter().zip(search_cache) {
            if global_matcher.is_match(text) && self.columns_match(store, index, &column_matchers)? {
                pass.display.push(index);
                pass.search_cache.push(text.clone());
            }
        }

        debug!(
            target: "FilterEngine",
            "Incremental filter '{}' kept {}/{} rows",
            global.term,
            pass.display.len(),
            current.len()
        );
        Ok(pass)
    }
}
