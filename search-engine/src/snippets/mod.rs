//! Math-aware snippet highlighting.
//!
//! A provider snippet arrives as text with match marker sentinels around the
//! matched spans. [`decompose`] turns it into a closed set of segments where
//! math regions are isolated and a marked span crossing a math boundary is
//! split into independent pieces on each side. Delimiter characters are never
//! part of a marked piece.
//!
//! [`reassemble`] is the inverse: `decompose(&reassemble(&d)) == Ok(d)` for
//! any `d` produced by `decompose`.

mod excerpt;
mod html;
mod locate;
mod markers;
mod math_scan;
mod segment;

use std::ops::Range;

pub use excerpt::{DEFAULT_CONTEXT_LINES, Excerpt, excerpt};
pub use html::render_html;
pub use locate::{Needle, mark_spans};
pub use markers::{MARK_CLOSE, MARK_OPEN, MarkedText, mark, strip_all_markers, strip_markers};
pub use math_scan::{MATH_ENVIRONMENTS, MathRegion, VERBATIM_ENVIRONMENTS, find_math_regions};
pub use segment::{MarkedRun, MathDelimiter, MathSegment, SnippetSegment};

use crate::error_handler::SnippetError;

/// Splits a marked snippet into plain and math segments.
///
/// # Errors
/// [`SnippetError`] when markers are nested, stray or unterminated.
pub fn decompose(raw: &str) -> Result<Vec<SnippetSegment>, SnippetError> {
    let MarkedText { text, ranges } = strip_markers(raw)?;

    let mut segments = Vec::new();
    let mut cursor = 0;
    for region in find_math_regions(&text) {
        push_plain(&mut segments, &text, cursor..region.span.start, &ranges);
        let body = split(region.body, &ranges)
            .into_iter()
            .map(|(r, marked)| MarkedRun {
                text: text[r].to_string(),
                marked,
            })
            .collect();
        segments.push(SnippetSegment::Math(MathSegment {
            delimiter: region.delimiter,
            body,
        }));
        cursor = region.span.end;
    }
    push_plain(&mut segments, &text, cursor..text.len(), &ranges);

    Ok(segments)
}

/// Re-inserts marker sentinels into the segment text.
pub fn reassemble(segments: &[SnippetSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            SnippetSegment::PlainUnmarked(text) => out.push_str(text),
            SnippetSegment::PlainMarked(text) => out.push_str(&mark(text)),
            SnippetSegment::Math(math) => {
                out.push_str(&math.delimiter.open());
                for run in &math.body {
                    if run.marked {
                        out.push_str(&mark(&run.text));
                    } else {
                        out.push_str(&run.text);
                    }
                }
                out.push_str(&math.delimiter.close());
            }
        }
    }
    out
}

/// Fallback for a malformed snippet: the whole text, markers dropped.
pub fn degrade(raw: &str) -> Vec<SnippetSegment> {
    let text = strip_all_markers(raw);
    if text.is_empty() {
        Vec::new()
    } else {
        vec![SnippetSegment::PlainUnmarked(text)]
    }
}

fn push_plain(
    out: &mut Vec<SnippetSegment>,
    text: &str,
    span: Range<usize>,
    ranges: &[Range<usize>],
) {
    for (r, marked) in split(span, ranges) {
        let piece = text[r].to_string();
        out.push(if marked {
            SnippetSegment::PlainMarked(piece)
        } else {
            SnippetSegment::PlainUnmarked(piece)
        });
    }
}

/// Cuts `span` into alternating unmarked/marked pieces.
fn split(span: Range<usize>, ranges: &[Range<usize>]) -> Vec<(Range<usize>, bool)> {
    let mut pieces = Vec::new();
    let mut pos = span.start;
    for r in ranges {
        let start = r.start.max(span.start);
        let end = r.end.min(span.end);
        if start >= end {
            continue;
        }
        if pos < start {
            pieces.push((pos..start, false));
        }
        pieces.push((start..end, true));
        pos = end;
    }
    if pos < span.end {
        pieces.push((pos..span.end, false));
    }
    pieces
}
