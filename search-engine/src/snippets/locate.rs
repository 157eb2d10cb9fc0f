//! Match location in unmarked document text.
//!
//! Used when a provider returns a hit without usable highlight offsets: the
//! adapter finds the matches itself and marks them before excerpting.

use std::ops::Range;

use regex::{Regex, RegexBuilder};

use super::markers::{MARK_CLOSE, MARK_OPEN};
use crate::query::{SearchMode, SearchQuery};

/// Compiled program size cap, same order as the regex gate's trial compile.
const LOCATE_SIZE_LIMIT: usize = 1 << 20;

/// What to look for in a document.
#[derive(Debug, Clone)]
pub enum Needle {
    Literal(String),
    Pattern(Regex),
}

impl Needle {
    pub fn literal(text: impl Into<String>) -> Self {
        Needle::Literal(text.into())
    }

    /// # Errors
    /// The `regex` crate's error when `pattern` does not compile.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        RegexBuilder::new(pattern)
            .multi_line(true)
            .size_limit(LOCATE_SIZE_LIMIT)
            .dfa_size_limit(LOCATE_SIZE_LIMIT)
            .build()
            .map(Needle::Pattern)
    }

    /// Needle for `query`; `None` when its pattern does not compile.
    pub fn for_query(query: &SearchQuery) -> Option<Self> {
        match query.mode {
            SearchMode::Literal => Some(Self::literal(query.text.as_str())),
            SearchMode::Regex => Self::pattern(&query.text).ok(),
        }
    }

    /// Non-empty, non-overlapping match ranges in `text`, left to right.
    ///
    /// A literal typed with a leading backslash also matches without it, the
    /// way the literal query itself does.
    pub fn spans(&self, text: &str) -> Vec<Range<usize>> {
        match self {
            Needle::Literal(needle) => {
                let found = occurrences(text, needle);
                match needle.strip_prefix('\\') {
                    Some(bare) if found.is_empty() => occurrences(text, bare),
                    _ => found,
                }
            }
            Needle::Pattern(re) => re
                .find_iter(text)
                .map(|m| m.range())
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }
}

fn occurrences(text: &str, needle: &str) -> Vec<Range<usize>> {
    if needle.is_empty() {
        return Vec::new();
    }
    text.match_indices(needle)
        .map(|(at, m)| at..at + m.len())
        .collect()
}

/// Wraps `spans` of `text` in marker pairs.
///
/// Spans that are empty, overlap an earlier span, or do not fall on character
/// boundaries are skipped.
pub fn mark_spans(text: &str, spans: impl IntoIterator<Item = Range<usize>>) -> String {
    let mut spans: Vec<Range<usize>> = spans.into_iter().collect();
    spans.sort_unstable_by_key(|r| (r.start, r.end));

    let mut out = String::with_capacity(text.len() + spans.len() * 6);
    let mut pos = 0;
    for r in spans {
        if r.start < pos || r.is_empty() || text.get(r.clone()).is_none() {
            continue;
        }
        out.push_str(&text[pos..r.start]);
        out.push(MARK_OPEN);
        out.push_str(&text[r.clone()]);
        out.push(MARK_CLOSE);
        pos = r.end;
    }
    out.push_str(&text[pos..]);
    out
}
