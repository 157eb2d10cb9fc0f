//! Regex safety gate.
//!
//! Every regex query passes three checks before any provider sees it:
//! 1. a length bound,
//! 2. a structural scan for nested unbounded quantifiers and unbounded
//!    repetition of overlapping alternations (`(a+)+`, `(.*)*`, `(a|ab)*`),
//! 3. a trial compile + match against an adversarial probe string, run on a
//!    blocking worker under a hard wall-clock budget.
//!
//! Step 3 cannot rely on the matcher cooperating, so the worker is abandoned
//! when the budget elapses. Its semaphore permit travels with it and is only
//! released when the worker really finishes, which caps how many runaway
//! probes can pile up.
//!
//! The trial runs on the linear-time `regex` crate, the same engine that
//! locates matches in document text, so its budget bounds compile size and
//! scan cost rather than backtracking. The providers speak other dialects:
//! OpenSearch gets a Lucene term regexp from `providers::lucene_regex` with
//! `max_determinized_states` capping its automaton, and a pattern with no
//! Lucene form becomes an ngram prefilter whose hits are verified locally.
//! The structural scan is what keeps a backtracking engine safe.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use regex::RegexBuilder;
use thiserror::Error;
use tokio::{sync::Semaphore, task};
use tracing::{debug, instrument, warn};

pub const DEFAULT_MAX_LEN: usize = 200;
pub const DEFAULT_PROBE_BUDGET: Duration = Duration::from_millis(50);
pub const DEFAULT_PROBE_LEN: usize = 4096;
pub const DEFAULT_PROBE_WORKERS: usize = 4;

/// Compiled program size cap for the trial compile.
const PROBE_SIZE_LIMIT: usize = 1 << 20;

/// Why a pattern was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegexRejection {
    #[error("pattern too long: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("invalid regex: {0}")]
    InvalidSyntax(String),

    #[error("catastrophic backtracking risk: {0}")]
    CatastrophicBacktrackRisk(String),

    #[error("no regex probe worker available")]
    ProbeSaturated,
}

/// Trial matcher: `(pattern, subject) -> Ok(matched) | Err(syntax error)`.
pub type ProbeMatcher = Arc<dyn Fn(&str, &str) -> Result<bool, String> + Send + Sync>;

/// Tunables for [`RegexSafetyValidator`].
#[derive(Debug, Clone)]
pub struct RegexSafetyConfig {
    /// Maximum pattern length in characters.
    pub max_len: usize,
    /// Wall-clock budget for one trial compile + match.
    pub probe_budget: Duration,
    /// Length of the repeated-character probe subject.
    pub probe_len: usize,
    /// Maximum concurrently running (or abandoned) probe workers.
    pub max_workers: usize,
}

impl Default for RegexSafetyConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
            probe_budget: DEFAULT_PROBE_BUDGET,
            probe_len: DEFAULT_PROBE_LEN,
            max_workers: DEFAULT_PROBE_WORKERS,
        }
    }
}

/// Provider-agnostic validator for regex queries.
pub struct RegexSafetyValidator {
    cfg: RegexSafetyConfig,
    slots: Arc<Semaphore>,
    matcher: ProbeMatcher,
}

impl RegexSafetyValidator {
    /// Creates a validator backed by the `regex` crate for the trial match.
    pub fn new(cfg: RegexSafetyConfig) -> Self {
        Self::with_matcher(cfg, Arc::new(regex_trial_match))
    }

    /// Creates a validator with a custom trial matcher.
    pub fn with_matcher(cfg: RegexSafetyConfig, matcher: ProbeMatcher) -> Self {
        let slots = Arc::new(Semaphore::new(cfg.max_workers.max(1)));
        Self {
            cfg,
            slots,
            matcher,
        }
    }

    pub fn config(&self) -> &RegexSafetyConfig {
        &self.cfg
    }

    /// Runs all checks in order; the first failure is final.
    ///
    /// # Errors
    /// Returns the [`RegexRejection`] of the first failing check.
    #[instrument(skip_all, fields(len = pattern.chars().count()))]
    pub async fn validate(&self, pattern: &str) -> Result<(), RegexRejection> {
        let len = pattern.chars().count();
        if len > self.cfg.max_len {
            return Err(RegexRejection::TooLong {
                len,
                max: self.cfg.max_len,
            });
        }

        if let Some(reason) = find_backtracking_hazard(pattern) {
            debug!(%reason, "structural scan rejected pattern");
            return Err(RegexRejection::CatastrophicBacktrackRisk(reason));
        }

        self.probe(pattern).await
    }

    async fn probe(&self, pattern: &str) -> Result<(), RegexRejection> {
        let permit = Arc::clone(&self.slots).try_acquire_owned().map_err(|_| {
            warn!(
                workers = self.cfg.max_workers,
                "all regex probe workers busy"
            );
            RegexRejection::ProbeSaturated
        })?;

        let matcher = Arc::clone(&self.matcher);
        let owned = pattern.to_string();
        let subject = probe_subject(pattern, self.cfg.probe_len);
        let started = Instant::now();

        let worker = task::spawn_blocking(move || {
            let _permit = permit;
            matcher(&owned, &subject)
        });

        match tokio::time::timeout(self.cfg.probe_budget, worker).await {
            Err(_) => {
                warn!(
                    budget_ms = self.cfg.probe_budget.as_millis() as u64,
                    "regex probe exceeded budget; worker abandoned"
                );
                Err(RegexRejection::CatastrophicBacktrackRisk(format!(
                    "trial match exceeded {} ms",
                    self.cfg.probe_budget.as_millis()
                )))
            }
            Ok(Err(join)) => Err(RegexRejection::CatastrophicBacktrackRisk(format!(
                "probe worker failed: {join}"
            ))),
            Ok(Ok(Err(syntax))) => Err(RegexRejection::InvalidSyntax(syntax)),
            Ok(Ok(Ok(matched))) => {
                debug!(
                    matched,
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "regex probe passed"
                );
                Ok(())
            }
        }
    }
}

/// Default trial matcher.
fn regex_trial_match(pattern: &str, subject: &str) -> Result<bool, String> {
    let re = RegexBuilder::new(pattern)
        .multi_line(true)
        .size_limit(PROBE_SIZE_LIMIT)
        .dfa_size_limit(PROBE_SIZE_LIMIT)
        .build()
        .map_err(|e| e.to_string())?;
    Ok(re.is_match(subject))
}

/// Repeats the pattern's first literal character and ends with a character
/// that is unlikely to complete the match, forcing a full failing scan.
fn probe_subject(pattern: &str, len: usize) -> String {
    let mut escaped = false;
    let mut in_class = false;
    let mut seed = 'a';
    for c in pattern.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '[' => in_class = true,
            ']' => in_class = false,
            c if !in_class && c.is_alphanumeric() => {
                seed = c;
                break;
            }
            _ => {}
        }
    }
    let mut subject = seed.to_string().repeat(len);
    subject.push('!');
    subject
}

/* ------------------------------------------------------------------------- */
/* Structural scan                                                           */
/* ------------------------------------------------------------------------- */

/// One open group while scanning.
#[derive(Default)]
struct Frame {
    start: usize,
    /// Some atom inside carries an unbounded quantifier.
    unbounded: bool,
    alternation: bool,
    /// First atom of each finished branch (`None` = empty branch).
    heads: Vec<Option<String>>,
    current_head: Option<String>,
}

impl Frame {
    fn note_atom(&mut self, key: &str) {
        if self.current_head.is_none() {
            self.current_head = Some(key.to_string());
        }
    }

    fn close_branch(&mut self) {
        self.heads.push(self.current_head.take());
    }

    fn overlapping_branches(&self) -> bool {
        if !self.alternation {
            return false;
        }
        let mut seen: Vec<&str> = Vec::new();
        for head in &self.heads {
            match head.as_deref() {
                None | Some(".") => return true,
                Some(h) if seen.contains(&h) => return true,
                Some(h) => seen.push(h),
            }
        }
        false
    }
}

/// What the next quantifier would apply to.
enum LastAtom {
    Simple,
    Group {
        text: String,
        inner_unbounded: bool,
        overlapping: bool,
    },
}

/// Looks for the pattern shapes known to backtrack exponentially.
///
/// Returns a human-readable reason, or `None` when nothing suspicious is found.
pub fn find_backtracking_hazard(pattern: &str) -> Option<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut stack = vec![Frame::default()];
    let mut last: Option<LastAtom> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let key: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                top(&mut stack).note_atom(&key);
                last = Some(LastAtom::Simple);
                i += 2;
            }
            '[' => {
                let end = class_end(&chars, i);
                let key: String = chars[i..end].iter().collect();
                top(&mut stack).note_atom(&key);
                last = Some(LastAtom::Simple);
                i = end;
            }
            '(' => {
                let body = group_body_start(&chars, i);
                if chars.get(body - 1) == Some(&')') {
                    // Inline flags like `(?i)`.
                    last = None;
                    i = body;
                    continue;
                }
                stack.push(Frame {
                    start: i,
                    ..Frame::default()
                });
                last = None;
                i = body;
            }
            ')' if stack.len() > 1 => {
                let mut frame = stack.pop().unwrap_or_default();
                if frame.alternation {
                    frame.close_branch();
                }
                let parent = top(&mut stack);
                parent.unbounded |= frame.unbounded;
                let head = frame
                    .heads
                    .iter()
                    .flatten()
                    .next()
                    .cloned()
                    .or(frame.current_head.clone())
                    .unwrap_or_else(|| "(".to_string());
                parent.note_atom(&head);
                last = Some(LastAtom::Group {
                    text: chars[frame.start..=i].iter().collect(),
                    inner_unbounded: frame.unbounded,
                    overlapping: frame.overlapping_branches(),
                });
                i += 1;
            }
            '|' => {
                let frame = top(&mut stack);
                frame.alternation = true;
                frame.close_branch();
                last = None;
                i += 1;
            }
            '*' | '+' | '?' | '{' => {
                let Some((unbounded, next)) = quantifier(&chars, i) else {
                    // A `{` that is not a repetition is a literal.
                    top(&mut stack).note_atom("{");
                    last = Some(LastAtom::Simple);
                    i += 1;
                    continue;
                };
                if unbounded {
                    if let Some(LastAtom::Group {
                        text,
                        inner_unbounded,
                        overlapping,
                    }) = &last
                    {
                        if *inner_unbounded {
                            return Some(format!(
                                "unbounded quantifier applied to group `{text}` that already repeats without bound"
                            ));
                        }
                        if *overlapping {
                            return Some(format!(
                                "unbounded repetition of alternation `{text}` with overlapping branches"
                            ));
                        }
                    }
                    top(&mut stack).unbounded = true;
                }
                last = None;
                i = next;
            }
            '^' | '$' => {
                last = None;
                i += 1;
            }
            other => {
                let key = other.to_string();
                top(&mut stack).note_atom(&key);
                last = Some(LastAtom::Simple);
                i += 1;
            }
        }
    }
    None
}

fn top(stack: &mut [Frame]) -> &mut Frame {
    let idx = stack.len() - 1;
    &mut stack[idx]
}

/// Index just past the closing `]` of a character class starting at `start`.
fn class_end(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Index of the first body character after `(`, `(?:`, `(?P<name>`, `(?<name>`
/// or `(?flags:`. For a flag-only group `(?i)` this points past the `)`.
fn group_body_start(chars: &[char], open: usize) -> usize {
    if chars.get(open + 1) != Some(&'?') {
        return open + 1;
    }
    let mut i = open + 2;
    if matches!(chars.get(i), Some('P')) {
        i += 1;
    }
    if chars.get(i) == Some(&'<') {
        while i < chars.len() && chars[i] != '>' {
            i += 1;
        }
        return (i + 1).min(chars.len());
    }
    while i < chars.len() {
        match chars[i] {
            ':' | ')' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Parses a quantifier at `i`; returns `(unbounded, index after it)`.
fn quantifier(chars: &[char], i: usize) -> Option<(bool, usize)> {
    let (unbounded, mut next) = match chars[i] {
        '*' | '+' => (true, i + 1),
        '?' => (false, i + 1),
        '{' => {
            let close = chars[i..].iter().position(|&c| c == '}')? + i;
            let inner: String = chars[i + 1..close].iter().collect();
            let (min, max) = match inner.split_once(',') {
                Some((min, max)) => (min.trim(), Some(max.trim())),
                None => (inner.trim(), None),
            };
            if min.is_empty() || !min.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let unbounded = match max {
                Some("") => true,
                Some(m) if m.chars().all(|c| c.is_ascii_digit()) => false,
                Some(_) => return None,
                None => false,
            };
            (unbounded, close + 1)
        }
        _ => return None,
    };
    if matches!(chars.get(next), Some('?') | Some('+')) {
        next += 1;
    }
    Some((unbounded, next))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn validator(budget_ms: u64) -> RegexSafetyValidator {
        RegexSafetyValidator::new(RegexSafetyConfig {
            probe_budget: Duration::from_millis(budget_ms),
            ..RegexSafetyConfig::default()
        })
    }

    fn slow_matcher(delay: Duration) -> ProbeMatcher {
        Arc::new(move |_p: &str, _s: &str| {
            std::thread::sleep(delay);
            Ok(false)
        })
    }

    #[test]
    fn flags_nested_unbounded_quantifiers() {
        for p in [
            "^(a+)+$",
            "(.*)*",
            "(a*b?)*",
            r"(\d+){2,}",
            "((ab)+c)*",
            "(?:x+y)+",
        ] {
            assert!(find_backtracking_hazard(p).is_some(), "{p} should be flagged");
        }
    }

    #[test]
    fn flags_overlapping_alternation_under_repetition() {
        for p in ["(a|a)*", "(a|ab)+", "(|a)*", "(.|x)*"] {
            assert!(find_backtracking_hazard(p).is_some(), "{p} should be flagged");
        }
    }

    #[test]
    fn accepts_ordinary_patterns() {
        for p in [
            r"\\begin\{align\*?\}",
            r"\\tikz\w+",
            "(ab)+",
            "(a+){2,5}",
            "[a-z]+(foo|bar)*",
            r"\d{4}-\d{2}",
            "(?i)newcommand",
            r"x\{3,\}",
            "[(]+",
        ] {
            assert_eq!(find_backtracking_hazard(p), None, "{p} should pass");
        }
    }

    #[tokio::test]
    async fn classic_redos_is_rejected() {
        let err = validator(50).validate("^(a+)+$").await.unwrap_err();
        assert!(matches!(err, RegexRejection::CatastrophicBacktrackRisk(_)));
    }

    #[tokio::test]
    async fn oversized_pattern_is_rejected_first() {
        let long = "a".repeat(DEFAULT_MAX_LEN + 1);
        let err = validator(50).validate(&long).await.unwrap_err();
        assert_eq!(
            err,
            RegexRejection::TooLong {
                len: DEFAULT_MAX_LEN + 1,
                max: DEFAULT_MAX_LEN
            }
        );
    }

    #[tokio::test]
    async fn safe_patterns_finish_within_budget() {
        let v = validator(500);
        for p in [
            r"\\newcommand\{\\[A-Za-z]+\}",
            r"\$[^$]+\$",
            "foo|bar|baz",
            &"ab".repeat(90),
        ] {
            assert_eq!(v.validate(p).await, Ok(()), "{p}");
        }
    }

    #[tokio::test]
    async fn syntax_errors_are_reported() {
        let err = validator(500).validate("(abc").await.unwrap_err();
        assert!(matches!(err, RegexRejection::InvalidSyntax(_)));
    }

    #[tokio::test]
    async fn budget_overrun_is_catastrophic_even_if_structure_is_fine() {
        let v = RegexSafetyValidator::with_matcher(
            RegexSafetyConfig {
                probe_budget: Duration::from_millis(10),
                ..RegexSafetyConfig::default()
            },
            slow_matcher(Duration::from_millis(200)),
        );
        let err = v.validate("abc").await.unwrap_err();
        assert!(matches!(err, RegexRejection::CatastrophicBacktrackRisk(_)));
    }

    #[tokio::test]
    async fn abandoned_workers_keep_their_slot() {
        let v = RegexSafetyValidator::with_matcher(
            RegexSafetyConfig {
                probe_budget: Duration::from_millis(10),
                max_workers: 1,
                ..RegexSafetyConfig::default()
            },
            slow_matcher(Duration::from_millis(400)),
        );
        assert!(v.validate("abc").await.is_err());
        assert_eq!(
            v.validate("abc").await,
            Err(RegexRejection::ProbeSaturated)
        );
    }

    #[test]
    fn probe_subject_uses_first_literal() {
        let s = probe_subject(r"\d+x+", 8);
        assert_eq!(s, "xxxxxxxx!");
        assert_eq!(probe_subject("[b]+", 2), "aa!");
    }

    const PATTERN_PIECES: &[&str] = &[
        "a", "b", "x", ".", r"\d", r"\w", r"\\", "[a-z]", "[^$]", "(", "(?:", ")", "|", "*",
        "+", "?", "{2}", "{1,3}", "{2,}", "^", "$",
    ];

    const ATOMS: &[&str] = &["a", ".", r"\d", "[ab]", "x|y", "ab*"];
    const INNER: &[&str] = &["+", "*", "{1,}"];
    const OUTER: &[&str] = &["+", "*", "{2,}"];

    /// Bounded, not necessarily valid, patterns built from regex syntax.
    fn bounded_pattern() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(PATTERN_PIECES), 1..16)
            .prop_map(|parts| parts.concat())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn every_pattern_is_answered_within_the_budget(pattern in bounded_pattern()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let v = validator(50);
            let started = Instant::now();
            let _ = rt.block_on(v.validate(&pattern));
            prop_assert!(
                started.elapsed() < Duration::from_millis(50 + 450),
                "{pattern} took {:?}",
                started.elapsed()
            );
        }

        #[test]
        fn nested_unbounded_groups_are_always_flagged(
            atom in prop::sample::select(ATOMS),
            inner in prop::sample::select(INNER),
            outer in prop::sample::select(OUTER),
        ) {
            let pattern = format!("({atom}{inner}){outer}");
            prop_assert!(find_backtracking_hazard(&pattern).is_some(), "{pattern}");
        }
    }
}
