//! Line window around the first match of a fully highlighted document.

use std::ops::Range;

use crate::error_handler::SnippetError;

use super::{
    markers::{MarkedText, insert_markers, strip_markers},
    math_scan::find_math_regions,
};

pub const DEFAULT_CONTEXT_LINES: usize = 8;

/// A marked excerpt and the 1-based line of its first match in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
    pub raw_snippet: String,
    pub line_number: u32,
}

/// Cuts `context_lines` lines on each side of the first marker.
///
/// The window is widened so that no math region is cut in half. Without any
/// marker the window starts at line 1.
///
/// # Errors
/// [`SnippetError`] when the markers in `raw` are malformed.
pub fn excerpt(raw: &str, context_lines: usize) -> Result<Excerpt, SnippetError> {
    let MarkedText { text, ranges } = strip_markers(raw)?;

    let anchor = ranges.first().map_or(0, |r| r.start);
    let line_index = text[..anchor].matches('\n').count();

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let first = line_index.saturating_sub(context_lines);
    let last = line_index + context_lines + 1;

    let mut start = line_starts[first];
    let mut end = match line_starts.get(last) {
        // Stop before the newline that ends the last kept line.
        Some(&next) => next - 1,
        None => text.len(),
    };

    for region in find_math_regions(&text) {
        if region.span.end > start && region.span.start < end {
            start = start.min(region.span.start);
            end = end.max(region.span.end);
        }
    }

    let window: Vec<Range<usize>> = ranges
        .iter()
        .filter_map(|r| {
            let s = r.start.max(start);
            let e = r.end.min(end);
            (s < e).then(|| s - start..e - start)
        })
        .collect();

    Ok(Excerpt {
        raw_snippet: insert_markers(&text[start..end], &window),
        line_number: u32::try_from(line_index + 1).unwrap_or(u32::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippets::markers::mark;

    fn numbered(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn windows_around_first_marker() {
        let mut lines = numbered(30);
        lines[14] = format!("line {}", mark("15"));
        let ex = excerpt(&lines.join("\n"), 2).unwrap();
        assert_eq!(ex.line_number, 15);
        assert_eq!(
            ex.raw_snippet,
            format!("line 13\nline 14\nline {}\nline 16\nline 17", mark("15"))
        );
    }

    #[test]
    fn clamps_at_document_edges() {
        let doc = format!("{} start\nnext\nlast", mark("hit"));
        let ex = excerpt(&doc, 8).unwrap();
        assert_eq!(ex.line_number, 1);
        assert_eq!(ex.raw_snippet, doc);
    }

    #[test]
    fn widens_to_whole_math_regions() {
        let doc = format!(
            "intro\n\\begin{{align}}\na &= b \\\\\nc &= {}\n\\end{{align}}\nafter\nend",
            mark("d")
        );
        let ex = excerpt(&doc, 0).unwrap();
        assert_eq!(ex.line_number, 4);
        assert!(ex.raw_snippet.starts_with("\\begin{align}"));
        assert!(ex.raw_snippet.ends_with("\\end{align}"));
    }

    #[test]
    fn no_marker_starts_at_top() {
        let doc = numbered(20).join("\n");
        let ex = excerpt(&doc, 1).unwrap();
        assert_eq!(ex.line_number, 1);
        assert_eq!(ex.raw_snippet, "line 1\nline 2");
    }

    #[test]
    fn malformed_markers_propagate() {
        assert!(excerpt("a\u{E000}b", 3).is_err());
    }
}
