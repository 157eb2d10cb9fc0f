//! Normalized search request and its construction rules.
//!
//! [`SearchQuery::parse`] applies the request limits (length, page, size,
//! filter keys) and decodes backslash escapes the way users type TeX queries
//! (`\\newcommand` means the literal `\newcommand`).

use std::collections::BTreeMap;

use tracing::debug;

use crate::error_handler::ValidationError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const MAX_QUERY_LENGTH: usize = 256;

/// Filter keys understood by the index mapping.
pub const FILTER_FIELDS: [&str; 2] = ["source", "year"];

/// How the query text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SearchMode {
    #[default]
    Literal,
    Regex,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Literal => "literal",
            SearchMode::Regex => "regex",
        }
    }
}

/// Request as received from the outer layer, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawSearchParams {
    pub q: String,
    pub mode: SearchMode,
    pub filters: BTreeMap<String, Option<String>>,
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub cursor: Option<String>,
}

/// A validated, normalized search request.
///
/// `cursor` takes precedence over `page`: when both are supplied the page is
/// dropped during [`SearchQuery::parse`]. With neither, iteration starts at
/// the first page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Escape-decoded query text (literal needle or regex pattern).
    pub text: String,
    pub mode: SearchMode,
    pub filters: BTreeMap<String, String>,
    pub page_size: u32,
    pub cursor: Option<String>,
    pub page: Option<u32>,
}

impl SearchQuery {
    /// Validates and normalizes raw parameters.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for empty/oversized queries, out-of-range
    /// page or size, and unknown filter keys.
    pub fn parse(raw: RawSearchParams) -> Result<Self, ValidationError> {
        let trimmed = raw.q.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let len = trimmed.chars().count();
        if len > MAX_QUERY_LENGTH {
            return Err(ValidationError::QueryTooLong {
                len,
                max: MAX_QUERY_LENGTH,
            });
        }

        let page_size = raw.size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ValidationError::InvalidPageSize {
                size: page_size,
                max: MAX_PAGE_SIZE,
            });
        }
        if raw.page == Some(0) {
            return Err(ValidationError::InvalidPage);
        }

        let mut filters = BTreeMap::new();
        for (key, value) in raw.filters {
            if !FILTER_FIELDS.contains(&key.as_str()) {
                return Err(ValidationError::UnknownFilter(key));
            }
            if let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                filters.insert(key, value);
            }
        }

        let cursor = raw.cursor.filter(|c| !c.trim().is_empty());
        let page = match (&cursor, raw.page) {
            (Some(_), Some(page)) => {
                debug!(page, "cursor supplied, ignoring explicit page");
                None
            }
            (_, page) => page,
        };

        Ok(Self {
            text: decode_escapes(trimmed),
            mode: raw.mode,
            filters,
            page_size,
            cursor,
            page,
        })
    }

    /// Convenience constructor for a first-page literal query.
    pub fn literal(text: impl Into<String>, page_size: u32) -> Self {
        Self {
            text: text.into(),
            mode: SearchMode::Literal,
            filters: BTreeMap::new(),
            page_size,
            cursor: None,
            page: None,
        }
    }

    /// Convenience constructor for a first-page regex query.
    pub fn regex(pattern: impl Into<String>, page_size: u32) -> Self {
        Self {
            mode: SearchMode::Regex,
            ..Self::literal(pattern, page_size)
        }
    }
}

/// Decodes backslash escapes in user input.
///
/// Known escapes (`\\`, `\n`, `\t`, `\r`, `\"`, `\'`, `\xHH`, `\uXXXX`) are
/// replaced; anything else (`\d`, `\w`, `\section`, a trailing `\`) is kept
/// verbatim so regex classes and TeX commands survive.
pub fn decode_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some(q @ ('"' | '\'')) => {
                chars.next();
                out.push(q);
            }
            Some(kind @ ('x' | 'u')) => {
                let width = if kind == 'x' { 2 } else { 4 };
                let mut lookahead = chars.clone();
                lookahead.next();
                let hex: String = lookahead.by_ref().take(width).collect();
                let decoded = (hex.len() == width)
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(char::from_u32);
                match decoded {
                    Some(ch) => {
                        out.push(ch);
                        chars = lookahead;
                    }
                    None => out.push('\\'),
                }
            }
            _ => out.push('\\'),
        }
    }
    out
}
