//! Left-to-right scanner locating math regions in TeX source.
//!
//! Priority at each position: `\verb` and verbatim environments (skipped as
//! plain text), math environments, `\[`, `\(`, `$$`, then `$`. A delimiter
//! preceded by an odd number of backslashes is escaped. An opener without a
//! usable close stays plain text and scanning resumes right after it.

use std::ops::Range;

use super::segment::MathDelimiter;

pub const MATH_ENVIRONMENTS: [&str; 10] = [
    "equation",
    "equation*",
    "align",
    "align*",
    "gather",
    "gather*",
    "multline",
    "multline*",
    "flalign",
    "flalign*",
];

pub const VERBATIM_ENVIRONMENTS: [&str; 4] = ["verbatim", "lstlisting", "minted", "filecontents"];

const BEGIN: &[u8] = b"\\begin{";

/// A math region in byte offsets of the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathRegion {
    /// Whole region including delimiters.
    pub span: Range<usize>,
    /// Body between the delimiters.
    pub body: Range<usize>,
    pub delimiter: MathDelimiter,
}

/// Finds every math region, in order, without overlaps.
pub fn find_math_regions(text: &str) -> Vec<MathRegion> {
    let bytes = text.as_bytes();
    let mut regions = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        let escaped = is_escaped(bytes, pos);

        if escaped {
            pos += 1;
            continue;
        }

        if rest.starts_with(b"\\verb") {
            if let Some(end) = verb_end(bytes, pos) {
                pos = end;
                continue;
            }
        }

        if rest.starts_with(BEGIN) {
            if let Some((name, body_start)) = environment_name(text, pos + BEGIN.len()) {
                if VERBATIM_ENVIRONMENTS.contains(&name) {
                    let close = format!(r"\end{{{name}}}");
                    if let Some(at) = find(bytes, close.as_bytes(), body_start) {
                        pos = at + close.len();
                        continue;
                    }
                } else if MATH_ENVIRONMENTS.contains(&name) {
                    if let Some(body_end) = environment_close(bytes, name, body_start) {
                        let end = body_end + name.len() + r"\end{}".len();
                        regions.push(MathRegion {
                            span: pos..end,
                            body: body_start..body_end,
                            delimiter: MathDelimiter::Environment(name.to_string()),
                        });
                        pos = end;
                        continue;
                    }
                }
            }
        }

        if rest.starts_with(br"\[") {
            if let Some(close) = find_unescaped(bytes, br"\]", pos + 2) {
                regions.push(region(pos, close, 2, MathDelimiter::Bracket));
                pos = close + 2;
                continue;
            }
        }

        if rest.starts_with(br"\(") {
            if let Some(close) = find_unescaped(bytes, br"\)", pos + 2) {
                regions.push(region(pos, close, 2, MathDelimiter::Paren));
                pos = close + 2;
                continue;
            }
        }

        if rest.starts_with(b"$$") {
            match find_unescaped(bytes, b"$$", pos + 2) {
                Some(close) => {
                    regions.push(region(pos, close, 2, MathDelimiter::DoubleDollar));
                    pos = close + 2;
                }
                None => pos += 2,
            }
            continue;
        }

        if rest[0] == b'$' {
            // A close that opens `$$` belongs to the higher-priority delimiter.
            if let Some(close) = find_unescaped(bytes, b"$", pos + 1)
                .filter(|&close| bytes.get(close + 1) != Some(&b'$'))
            {
                regions.push(region(pos, close, 1, MathDelimiter::Dollar));
                pos = close + 1;
                continue;
            }
        }

        pos += 1;
    }

    regions
}

fn region(open: usize, close: usize, width: usize, delimiter: MathDelimiter) -> MathRegion {
    MathRegion {
        span: open..close + width,
        body: open + width..close,
        delimiter,
    }
}

/// Odd number of backslashes directly before `idx`.
pub fn is_escaped(bytes: &[u8], idx: usize) -> bool {
    bytes[..idx].iter().rev().take_while(|&&b| b == b'\\').count() % 2 == 1
}

fn find(bytes: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn find_unescaped(bytes: &[u8], needle: &[u8], mut from: usize) -> Option<usize> {
    loop {
        let at = find(bytes, needle, from)?;
        if !is_escaped(bytes, at) {
            return Some(at);
        }
        from = at + needle.len();
    }
}

/// End offset of `\verb<d>…<d>` (or `\verb*`), if well formed.
fn verb_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut pos = start + r"\verb".len();
    if bytes.get(pos) == Some(&b'*') {
        pos += 1;
    }
    let delimiter = *bytes.get(pos)?;
    if delimiter.is_ascii_alphabetic() || delimiter == b'\n' || !delimiter.is_ascii() {
        return None;
    }
    find(bytes, &[delimiter], pos + 1).map(|end| end + 1)
}

/// Reads `name}` starting at `from`; returns the name and the offset after `}`.
///
/// The name is taken verbatim: `\begin{ equation }` is not an `equation`.
fn environment_name(text: &str, from: usize) -> Option<(&str, usize)> {
    let close = find(text.as_bytes(), b"}", from)?;
    let name = &text[from..close];
    (!name.is_empty()).then_some((name, close + 1))
}

/// Start of the matching `\end{name}`, honouring nested `\begin{name}`.
fn environment_close(bytes: &[u8], name: &str, from: usize) -> Option<usize> {
    let open = format!(r"\begin{{{name}}}");
    let close = format!(r"\end{{{name}}}");
    let mut depth = 1usize;
    let mut pos = from;
    loop {
        let next_close = find(bytes, close.as_bytes(), pos)?;
        match find(bytes, open.as_bytes(), pos) {
            Some(next_open) if next_open < next_close => {
                depth += 1;
                pos = next_open + open.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(next_close);
                }
                pos = next_close + close.len();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<(MathDelimiter, &str)> {
        find_math_regions(text)
            .into_iter()
            .map(|r| (r.delimiter, &text[r.body]))
            .collect()
    }

    #[test]
    fn recognizes_every_delimiter() {
        assert_eq!(kinds("The $x^2$ result"), vec![(MathDelimiter::Dollar, "x^2")]);
        assert_eq!(kinds("a $$y$$ b"), vec![(MathDelimiter::DoubleDollar, "y")]);
        assert_eq!(kinds(r"\[ z \]"), vec![(MathDelimiter::Bracket, " z ")]);
        assert_eq!(kinds(r"\(w\)"), vec![(MathDelimiter::Paren, "w")]);
        assert_eq!(
            kinds(r"\begin{align*}a&=b\end{align*}"),
            vec![(MathDelimiter::Environment("align*".into()), "a&=b")]
        );
    }

    #[test]
    fn nested_environments_close_at_the_outer_end() {
        let text = r"\begin{gather}\begin{gather}x\end{gather}\end{gather} tail";
        let regions = find_math_regions(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(&text[regions[0].span.clone()], text.trim_end_matches(" tail"));
    }

    #[test]
    fn escaped_dollars_are_not_delimiters() {
        assert!(find_math_regions(r"costs \$5 or \$6").is_empty());
        assert_eq!(kinds(r"$a\$b$"), vec![(MathDelimiter::Dollar, r"a\$b")]);
        assert!(find_math_regions(r"line\\[2pt] next \]").is_empty());
    }

    #[test]
    fn verbatim_hides_dollars() {
        assert!(find_math_regions(r"\verb|$x$| and \verb*+$+").is_empty());
        assert!(find_math_regions("\\begin{verbatim}$a$\\end{verbatim}").is_empty());
        assert_eq!(
            kinds("\\begin{lstlisting}$\\end{lstlisting} $k$"),
            vec![(MathDelimiter::Dollar, "k")]
        );
    }

    #[test]
    fn unterminated_openers_stay_plain() {
        assert!(find_math_regions("price $5 and more").is_empty());
        assert!(find_math_regions(r"\[ never closed").is_empty());
        assert_eq!(
            kinds("cost $5 and $$x$$"),
            vec![(MathDelimiter::DoubleDollar, "x")]
        );
        assert_eq!(kinds("$$ open then $q$"), vec![(MathDelimiter::Dollar, "q")]);
    }

    #[test]
    fn non_math_environments_are_ignored() {
        assert_eq!(
            kinds(r"\begin{itemize}\item $t$\end{itemize}"),
            vec![(MathDelimiter::Dollar, "t")]
        );
    }

    #[test]
    fn padded_environment_names_are_plain_text() {
        assert!(find_math_regions(r"x \begin{ equation }a\end{equation} y").is_empty());
        assert_eq!(
            kinds(r"\begin{ equation }$a$\end{equation}"),
            vec![(MathDelimiter::Dollar, "a")]
        );
    }

    #[test]
    fn unterminated_opener_before_a_stronger_delimiter() {
        // The `$` never closes cleanly, so the `\[...\]` inside it wins.
        assert_eq!(
            kinds(r"$a \[b\] c"),
            vec![(MathDelimiter::Bracket, "b")]
        );
        assert_eq!(
            kinds(r"$a \[b\] c$"),
            vec![(MathDelimiter::Dollar, r"a \[b\] c")]
        );
    }

    #[test]
    fn multibyte_text_is_scanned_safely() {
        assert_eq!(kinds("héllo $αβ$ wörld"), vec![(MathDelimiter::Dollar, "αβ")]);
    }
}
