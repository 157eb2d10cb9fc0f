//! Regex dialect bridge for the OpenSearch adapter.
//!
//! User patterns follow the `regex` crate syntax, which is also what the
//! safety gate compiles and what local match verification runs. OpenSearch
//! `regexp` queries use Lucene's dialect instead and match a whole indexed
//! term (here: a whitespace-delimited token), with `^`/`$` as plain
//! characters. [`to_term_regexp`] rewrites a pattern into that form; a
//! pattern that has no faithful term-level form goes through
//! [`ngram_prefilter`] instead and the adapter verifies matches locally.

use serde_json::{Value, json};
use thiserror::Error;

/// Shortest gram indexed by `content.ngram`.
const MIN_GRAM: usize = 2;
/// Longest gram indexed by `content.ngram`.
const MAX_GRAM: usize = 15;
/// Cap on `term` clauses per branch.
const MAX_GRAMS: usize = 20;

/// Characters that are operators in Lucene's optional syntax but plain
/// characters in the `regex` crate.
const LUCENE_ONLY_OPERATORS: [char; 7] = ['"', '#', '@', '&', '<', '>', '~'];

/// Why a pattern has no term-level Lucene form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Untranslatable {
    #[error("escape `\\{0}` has no term-level equivalent")]
    Escape(char),
    #[error("anchor inside the pattern")]
    InnerAnchor,
    #[error("anchored top-level alternation")]
    AnchoredAlternation,
    #[error("whitespace never occurs inside an indexed token")]
    Whitespace,
    #[error("inline flags are not supported")]
    Flags,
    #[error("unsupported character class syntax")]
    Class,
}

/// Rewrites `pattern` into a Lucene regexp that matches a whole token
/// containing a match.
///
/// Unanchored ends are padded with `.*`, `\d`/`\w` and their negations are
/// spelled out as classes, lazy quantifier suffixes are dropped (they do not
/// change which strings match), and Lucene-only operator characters are
/// escaped.
///
/// # Errors
/// [`Untranslatable`] for constructs with no term-level counterpart.
pub fn to_term_regexp(pattern: &str) -> Result<String, Untranslatable> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut start = 0;
    let mut end = chars.len();

    let anchored_start = chars.first() == Some(&'^');
    if anchored_start {
        start = 1;
    }
    let anchored_end = end > start && chars[end - 1] == '$' && !escaped(&chars, end - 1);
    if anchored_end {
        end -= 1;
    }

    let mut out = String::with_capacity(pattern.len() + 8);
    let mut depth = 0usize;
    let mut top_level_alternation = false;
    let mut after_quantifier = false;
    let mut i = start;

    while i < end {
        let c = chars[i];
        let was_quantifier = after_quantifier;
        after_quantifier = false;
        match c {
            '\\' => {
                let Some(&next) = chars.get(i + 1) else {
                    return Err(Untranslatable::Escape(' '));
                };
                match next {
                    'd' => out.push_str("[0-9]"),
                    'D' => out.push_str("[^0-9]"),
                    'w' => out.push_str("[0-9A-Za-z_]"),
                    'W' => out.push_str("[^0-9A-Za-z_]"),
                    'S' => out.push('.'),
                    n if n.is_ascii_alphanumeric() || n.is_whitespace() => {
                        return Err(Untranslatable::Escape(n));
                    }
                    n => {
                        out.push('\\');
                        out.push(n);
                    }
                }
                i += 2;
            }
            '[' => {
                let close = class_end(&chars, i)?;
                copy_class(&chars[i..close], &mut out)?;
                i = close;
            }
            '(' => {
                if chars.get(i + 1) == Some(&'?') {
                    i = named_or_plain_group(&chars, i)?;
                } else {
                    i += 1;
                }
                out.push('(');
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                out.push(')');
                i += 1;
            }
            '|' => {
                if depth == 0 {
                    top_level_alternation = true;
                }
                out.push('|');
                i += 1;
            }
            '*' | '+' => {
                out.push(c);
                after_quantifier = true;
                i += 1;
            }
            '?' => {
                // A `?` right after a quantifier only makes it lazy.
                if !was_quantifier {
                    out.push('?');
                    after_quantifier = true;
                }
                i += 1;
            }
            '{' => match repetition(&chars, i) {
                Some(rep) => {
                    out.push_str(&rep.lucene());
                    after_quantifier = true;
                    i = rep.next;
                }
                None => {
                    out.push_str("\\{");
                    i += 1;
                }
            },
            '}' => {
                out.push_str("\\}");
                i += 1;
            }
            '^' | '$' => return Err(Untranslatable::InnerAnchor),
            c if c.is_whitespace() => return Err(Untranslatable::Whitespace),
            c if LUCENE_ONLY_OPERATORS.contains(&c) => {
                out.push('\\');
                out.push(c);
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    if top_level_alternation && (anchored_start || anchored_end) {
        return Err(Untranslatable::AnchoredAlternation);
    }

    let prefix = if anchored_start { "" } else { ".*" };
    let suffix = if anchored_end { "" } else { ".*" };
    Ok(format!("{prefix}({out}){suffix}"))
}

/// Coarse `content.ngram` query: every branch of the pattern must contain
/// the literal runs it cannot match without.
///
/// Returns `match_all` when some branch has no usable literal.
pub fn ngram_prefilter(pattern: &str) -> Value {
    let mut branches = Vec::new();
    for runs in required_runs(pattern) {
        let grams = grams(&runs);
        if grams.is_empty() {
            return json!({ "match_all": {} });
        }
        let terms: Vec<Value> = grams
            .into_iter()
            .map(|g| json!({ "term": { "content.ngram": g } }))
            .collect();
        branches.push(json!({ "bool": { "must": terms } }));
    }

    match branches.len() {
        0 => json!({ "match_all": {} }),
        1 => branches.remove(0),
        _ => json!({ "bool": { "should": branches, "minimum_should_match": 1 } }),
    }
}

/// Literal runs every match must contain, one list per top-level branch.
///
/// Groups are skipped as a whole; a run ends at any operator, and a character
/// made optional by `?`, `*` or `{0,…}` is dropped from its run.
fn required_runs(pattern: &str) -> Vec<Vec<String>> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut branches = Vec::new();
    let mut runs: Vec<String> = Vec::new();
    let mut run = String::new();
    let mut i = 0;

    let flush = |run: &mut String, runs: &mut Vec<String>| {
        if !run.is_empty() {
            runs.push(std::mem::take(run));
        }
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                match chars.get(i + 1) {
                    Some(&n) if !n.is_ascii_alphanumeric() && !n.is_whitespace() => run.push(n),
                    _ => flush(&mut run, &mut runs),
                }
                i += 2;
            }
            '[' => {
                flush(&mut run, &mut runs);
                i = class_end(&chars, i).unwrap_or(chars.len());
            }
            '(' => {
                flush(&mut run, &mut runs);
                i = group_end(&chars, i);
            }
            '|' => {
                flush(&mut run, &mut runs);
                branches.push(std::mem::take(&mut runs));
                i += 1;
            }
            '*' | '?' => {
                run.pop();
                flush(&mut run, &mut runs);
                i += 1;
            }
            '+' => {
                flush(&mut run, &mut runs);
                i += 1;
            }
            '{' => match repetition(&chars, i) {
                Some(rep) => {
                    if rep.min == 0 {
                        run.pop();
                    }
                    flush(&mut run, &mut runs);
                    i = rep.next;
                }
                None => {
                    run.push('{');
                    i += 1;
                }
            },
            c if c == '.' || c == '^' || c == '$' || c == ')' || c.is_whitespace() => {
                flush(&mut run, &mut runs);
                i += 1;
            }
            c => {
                run.push(c);
                i += 1;
            }
        }
    }
    flush(&mut run, &mut runs);
    branches.push(runs);
    branches
}

/// Indexed grams covering `runs`: short runs as they are, long runs as
/// maximal-length windows.
fn grams(runs: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for run in runs {
        let chars: Vec<char> = run.chars().collect();
        if chars.len() < MIN_GRAM {
            continue;
        }
        let mut windows = Vec::new();
        if chars.len() <= MAX_GRAM {
            windows.push(run.clone());
        } else {
            let mut at = 0;
            while at + MAX_GRAM < chars.len() {
                windows.push(chars[at..at + MAX_GRAM].iter().collect());
                at += MAX_GRAM;
            }
            windows.push(chars[chars.len() - MAX_GRAM..].iter().collect());
        }
        for w in windows {
            if !out.contains(&w) {
                out.push(w);
            }
            if out.len() >= MAX_GRAMS {
                return out;
            }
        }
    }
    out
}

/* ------------------------------------------------------------------------- */
/* Shared scanning helpers                                                   */
/* ------------------------------------------------------------------------- */

fn escaped(chars: &[char], idx: usize) -> bool {
    chars[..idx].iter().rev().take_while(|&&c| c == '\\').count() % 2 == 1
}

/// Index just past the `]` closing the class that opens at `open`.
fn class_end(chars: &[char], open: usize) -> Result<usize, Untranslatable> {
    let mut i = open + 1;
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '[' => return Err(Untranslatable::Class),
            ']' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(Untranslatable::Class)
}

/// Copies a `[...]` class, rejecting escapes and set operators Lucene lacks.
fn copy_class(class: &[char], out: &mut String) -> Result<(), Untranslatable> {
    let mut i = 0;
    while i < class.len() {
        let c = class[i];
        if c == '\\' {
            match class.get(i + 1) {
                Some(&'d') => out.push_str("0-9"),
                Some(&n) if n.is_ascii_alphanumeric() || n.is_whitespace() => {
                    return Err(Untranslatable::Escape(n));
                }
                Some(&n) => {
                    out.push('\\');
                    out.push(n);
                }
                None => return Err(Untranslatable::Class),
            }
            i += 2;
            continue;
        }
        if (c == '&' || c == '~' || c == '-') && class.get(i + 1) == Some(&c) {
            return Err(Untranslatable::Class);
        }
        out.push(c);
        i += 1;
    }
    Ok(())
}

/// Handles `(?:`, `(?P<name>` and `(?<name>`; returns the body start.
fn named_or_plain_group(chars: &[char], open: usize) -> Result<usize, Untranslatable> {
    let mut i = open + 2;
    match chars.get(i) {
        Some(':') => Ok(i + 1),
        Some('P') | Some('<') => {
            while i < chars.len() && chars[i] != '>' {
                i += 1;
            }
            Ok(i + 1)
        }
        _ => Err(Untranslatable::Flags),
    }
}

/// Index just past the `)` matching the `(` at `open`.
fn group_end(chars: &[char], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '[' => {
                i = class_end(chars, i).unwrap_or(chars.len());
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    chars.len()
}

/// A `{n}`, `{n,}` or `{n,m}` counted repetition.
struct Repetition {
    min: u32,
    max: Option<u32>,
    bounded: bool,
    /// Index after the closing `}` and any lazy `?`.
    next: usize,
}

impl Repetition {
    fn lucene(&self) -> String {
        match (self.bounded, self.max) {
            (true, Some(max)) => format!("{{{},{}}}", self.min, max),
            (true, None) => format!("{{{}}}", self.min),
            (false, _) => format!("{{{},}}", self.min),
        }
    }
}

fn repetition(chars: &[char], open: usize) -> Option<Repetition> {
    let close = chars[open..].iter().position(|&c| c == '}')? + open;
    let inner: String = chars[open + 1..close].iter().collect();
    let (min, max, bounded) = match inner.split_once(',') {
        Some((min, "")) => (min.trim(), None, false),
        Some((min, max)) => (min.trim(), Some(max.trim()), true),
        None => (inner.trim(), None, true),
    };
    let min = min.parse::<u32>().ok()?;
    let max = match max {
        Some(m) => Some(m.parse::<u32>().ok()?),
        None => None,
    };
    let mut next = close + 1;
    if chars.get(next) == Some(&'?') {
        next += 1;
    }
    Some(Repetition {
        min,
        max,
        bounded,
        next,
    })
}
