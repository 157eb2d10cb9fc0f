//! Match marker sentinels.
//!
//! Providers are asked to wrap matched spans in two private-use characters
//! that never occur in indexed TeX, so stripping them is unambiguous.

use std::ops::Range;

use crate::error_handler::SnippetError;

pub const MARK_OPEN: char = '\u{E000}';
pub const MARK_CLOSE: char = '\u{E001}';

/// Text with markers removed plus the marked byte ranges of that text.
///
/// Ranges are sorted, non-empty, and never touch: adjacent marked spans are
/// merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedText {
    pub text: String,
    pub ranges: Vec<Range<usize>>,
}

/// Removes markers and records where they were.
///
/// # Errors
/// [`SnippetError`] for a nested opener, a closer without opener, or an
/// opener that never closes. Offsets refer to the raw input.
pub fn strip_markers(raw: &str) -> Result<MarkedText, SnippetError> {
    let mut text = String::with_capacity(raw.len());
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut open: Option<(usize, usize)> = None;

    for (at, c) in raw.char_indices() {
        match c {
            MARK_OPEN => {
                if open.is_some() {
                    return Err(SnippetError::NestedMarker(at));
                }
                open = Some((at, text.len()));
            }
            MARK_CLOSE => {
                let Some((_, start)) = open.take() else {
                    return Err(SnippetError::StrayClose(at));
                };
                push_range(&mut ranges, start..text.len());
            }
            c => text.push(c),
        }
    }

    if let Some((at, _)) = open {
        return Err(SnippetError::Unterminated(at));
    }
    Ok(MarkedText { text, ranges })
}

/// Drops every marker character, balanced or not.
pub fn strip_all_markers(raw: &str) -> String {
    raw.chars()
        .filter(|&c| c != MARK_OPEN && c != MARK_CLOSE)
        .collect()
}

/// Inverse of [`strip_markers`] for well-formed ranges.
pub fn insert_markers(text: &str, ranges: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(text.len() + ranges.len() * 6);
    let mut pos = 0;
    for r in ranges {
        out.push_str(&text[pos..r.start]);
        out.push(MARK_OPEN);
        out.push_str(&text[r.start..r.end]);
        out.push(MARK_CLOSE);
        pos = r.end;
    }
    out.push_str(&text[pos..]);
    out
}

/// Wraps `text` in a marker pair.
pub fn mark(text: &str) -> String {
    format!("{MARK_OPEN}{text}{MARK_CLOSE}")
}

fn push_range(ranges: &mut Vec<Range<usize>>, r: Range<usize>) {
    if r.is_empty() {
        return;
    }
    match ranges.last_mut() {
        Some(last) if last.end == r.start => last.end = r.end,
        _ => ranges.push(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_and_records_ranges() {
        let raw = format!("a {} c", mark("bé"));
        let m = strip_markers(&raw).unwrap();
        assert_eq!(m.text, "a bé c");
        assert_eq!(m.ranges, vec![2..5]);
        assert_eq!(insert_markers(&m.text, &m.ranges), raw);
    }

    #[test]
    fn touching_and_empty_spans_are_normalized() {
        let raw = format!("{}{}x{}", mark("a"), mark("b"), mark(""));
        let m = strip_markers(&raw).unwrap();
        assert_eq!(m.text, "abx");
        assert_eq!(m.ranges, vec![0..2]);
    }

    #[test]
    fn malformed_markers_are_reported() {
        assert_eq!(
            strip_markers("\u{E000}a\u{E000}b\u{E001}"),
            Err(SnippetError::NestedMarker(4))
        );
        assert_eq!(strip_markers("a\u{E001}"), Err(SnippetError::StrayClose(1)));
        assert_eq!(strip_markers("ab\u{E000}c"), Err(SnippetError::Unterminated(2)));
        assert_eq!(strip_all_markers("a\u{E001}b\u{E000}"), "ab");
    }
}
