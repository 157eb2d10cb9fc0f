use super::segment::SnippetSegment;

/// Legacy `snippet_html`: escaped text, `<mark>` around marked plain text,
/// math as delimited TeX with highlight directives.
pub fn render_html(segments: &[SnippetSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            SnippetSegment::PlainUnmarked(text) => escape_into(&mut out, text),
            SnippetSegment::PlainMarked(text) => {
                out.push_str("<mark>");
                escape_into(&mut out, text);
                out.push_str("</mark>");
            }
            SnippetSegment::Math(math) => escape_into(&mut out, &math.typeset_source()),
        }
    }
    out
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
}
