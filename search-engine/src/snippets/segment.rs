//! Closed set of snippet pieces produced by [`super::decompose`].

use serde::Serialize;

/// Directive wrapped around highlighted runs inside math.
pub const MATH_HIGHLIGHT_OPEN: &str = r"\class{mjx-hl}{";
pub const MATH_HIGHLIGHT_CLOSE: &str = "}";

/// How a math region is delimited in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum MathDelimiter {
    /// `$ … $`
    Dollar,
    /// `$$ … $$`
    DoubleDollar,
    /// `\[ … \]`
    Bracket,
    /// `\( … \)`
    Paren,
    /// `\begin{name} … \end{name}`
    Environment(String),
}

impl MathDelimiter {
    pub fn open(&self) -> String {
        match self {
            Self::Dollar => "$".into(),
            Self::DoubleDollar => "$$".into(),
            Self::Bracket => r"\[".into(),
            Self::Paren => r"\(".into(),
            Self::Environment(name) => format!(r"\begin{{{name}}}"),
        }
    }

    pub fn close(&self) -> String {
        match self {
            Self::Dollar => "$".into(),
            Self::DoubleDollar => "$$".into(),
            Self::Bracket => r"\]".into(),
            Self::Paren => r"\)".into(),
            Self::Environment(name) => format!(r"\end{{{name}}}"),
        }
    }

    /// Display (block) math as opposed to inline math.
    pub fn display(&self) -> bool {
        !matches!(self, Self::Dollar | Self::Paren)
    }
}

/// A piece of math body text with its highlight state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkedRun {
    pub text: String,
    pub marked: bool,
}

/// A math region: delimiter plus a body split into marked/unmarked runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MathSegment {
    pub delimiter: MathDelimiter,
    pub body: Vec<MarkedRun>,
}

impl MathSegment {
    pub fn display(&self) -> bool {
        self.delimiter.display()
    }

    pub fn is_marked(&self) -> bool {
        self.body.iter().any(|r| r.marked)
    }

    /// Body text without delimiters or highlight directives.
    pub fn body_text(&self) -> String {
        self.body.iter().map(|r| r.text.as_str()).collect()
    }

    /// Visible source text, delimiters included.
    pub fn source(&self) -> String {
        format!(
            "{}{}{}",
            self.delimiter.open(),
            self.body_text(),
            self.delimiter.close()
        )
    }

    /// TeX handed to the typesetter: marked runs wrapped in
    /// `\class{mjx-hl}{…}`. Environments keep their `\begin`/`\end`
    /// wrapper; other delimiters are left to the renderer.
    pub fn tex(&self) -> String {
        let mut body = String::new();
        for run in &self.body {
            if run.marked {
                body.push_str(MATH_HIGHLIGHT_OPEN);
                body.push_str(&run.text);
                body.push_str(MATH_HIGHLIGHT_CLOSE);
            } else {
                body.push_str(&run.text);
            }
        }
        match &self.delimiter {
            MathDelimiter::Environment(_) => {
                format!("{}{}{}", self.delimiter.open(), body, self.delimiter.close())
            }
            _ => body,
        }
    }

    /// `tex()` with the original delimiters restored, for inline rendering.
    pub fn typeset_source(&self) -> String {
        match &self.delimiter {
            MathDelimiter::Environment(_) => self.tex(),
            d => format!("{}{}{}", d.open(), self.tex(), d.close()),
        }
    }
}

/// One piece of a decomposed snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SnippetSegment {
    PlainUnmarked(String),
    PlainMarked(String),
    Math(MathSegment),
}

impl SnippetSegment {
    /// Visible text of this piece; concatenation over a snippet yields the
    /// snippet with markers stripped.
    pub fn text(&self) -> String {
        match self {
            Self::PlainUnmarked(t) | Self::PlainMarked(t) => t.clone(),
            Self::Math(m) => m.source(),
        }
    }

    pub fn is_marked(&self) -> bool {
        match self {
            Self::PlainUnmarked(_) => false,
            Self::PlainMarked(_) => true,
            Self::Math(m) => m.is_marked(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, marked: bool) -> MarkedRun {
        MarkedRun {
            text: text.into(),
            marked,
        }
    }

    #[test]
    fn tex_wraps_marked_runs_only() {
        let m = MathSegment {
            delimiter: MathDelimiter::Dollar,
            body: vec![run("a+", false), run("b", true)],
        };
        assert_eq!(m.tex(), r"a+\class{mjx-hl}{b}");
        assert_eq!(m.source(), "$a+b$");
        assert_eq!(m.typeset_source(), r"$a+\class{mjx-hl}{b}$");
        assert!(!m.display());
    }

    #[test]
    fn environments_keep_their_wrapper() {
        let m = MathSegment {
            delimiter: MathDelimiter::Environment("align*".into()),
            body: vec![run("x", true)],
        };
        assert_eq!(m.tex(), r"\begin{align*}\class{mjx-hl}{x}\end{align*}");
        assert_eq!(m.typeset_source(), m.tex());
        assert!(m.display());
    }
}
