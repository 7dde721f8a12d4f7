//! Pattern matching over raw REPL output.
//!
//! Output from a pseudo-terminal is bytes, not text, so everything here works
//! on `&[u8]`.
//!
//! ## Match modes
//!
//! | Mode | Engine | Use |
//! |------|--------|-----|
//! | [`MatchMode::Regexp`]  | [`regex::bytes`] | prompts, output boundaries |
//! | [`MatchMode::Literal`] | [`aho_corasick`] | command echo |
//!
//! A [`PatternSet`] tries its patterns in order; the first one that matches
//! anywhere in the buffer wins.

use std::ops::Range;
use std::sync::Arc;

use aho_corasick::AhoCorasick;
use regex::bytes::{Regex, RegexBuilder};
use thiserror::Error;

// ── Public types ─────────────────────────────────────────────────────────────

/// Which matching algorithm a [`Pattern`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Regexp,
    Literal,
}

/// Error returned when a pattern cannot be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("regex error: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("empty literal pattern")]
    EmptyLiteral,
}

#[derive(Clone)]
enum Compiled {
    Regex(Arc<Regex>),
    Literal(Arc<AhoCorasick>),
}

/// A compiled pattern ready for matching.
#[derive(Clone)]
pub struct Pattern {
    src: String,
    mode: MatchMode,
    compiled: Compiled,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("src", &self.src)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Pattern {
    /// Compile `src` using `mode`.
    pub fn new(src: &str, mode: MatchMode) -> Result<Self, PatternError> {
        let compiled = match mode {
            MatchMode::Regexp => Compiled::Regex(Arc::new(compile_regex(src)?)),
            MatchMode::Literal => {
                if src.is_empty() {
                    return Err(PatternError::EmptyLiteral);
                }
                Compiled::Literal(Arc::new(AhoCorasick::new([src])))
            }
        };
        Ok(Self {
            src: src.to_owned(),
            mode,
            compiled,
        })
    }

    pub fn regex(src: &str) -> Result<Self, PatternError> {
        Self::new(src, MatchMode::Regexp)
    }

    pub fn literal(src: &str) -> Result<Self, PatternError> {
        Self::new(src, MatchMode::Literal)
    }

    /// The original source string.
    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn is_match(&self, haystack: &[u8]) -> bool {
        self.find(haystack).is_some()
    }

    /// Leftmost match in `haystack`.  [`Match::pattern`] is left at 0.
    pub fn find(&self, haystack: &[u8]) -> Option<Match> {
        match &self.compiled {
            Compiled::Regex(re) => {
                let caps = re.captures(haystack)?;
                let whole = caps.get(0)?;
                let groups = (1..caps.len())
                    .map(|i| caps.get(i).map(|m| m.range()))
                    .collect();
                Some(Match {
                    pattern: 0,
                    start: whole.start(),
                    end: whole.end(),
                    groups,
                })
            }
            Compiled::Literal(ac) => ac.find(haystack).map(|m| Match {
                pattern: 0,
                start: m.start(),
                end: m.end(),
                groups: Vec::new(),
            }),
        }
    }
}

/// A successful match: which pattern, where, and its capture groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index of the matching pattern within its [`PatternSet`].
    pub pattern: usize,
    pub start: usize,
    pub end: usize,
    /// Byte ranges per capture group; `None` = group didn't participate.
    groups: Vec<Option<Range<usize>>>,
}

impl Match {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The nth capture group, 1-based.
    pub fn group(&self, n: usize) -> Option<Range<usize>> {
        self.groups.get(n.checked_sub(1)?)?.clone()
    }

    /// Number of capture groups (excluding the overall match).
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The first capture group if there is one, else the whole match.
    pub fn capture(&self) -> Range<usize> {
        self.group(1).unwrap_or_else(|| self.range())
    }
}

/// An ordered list of patterns; earlier patterns take priority.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pattern: Pattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn push(&mut self, pattern: Pattern) -> usize {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    /// The first pattern, in order, that matches anywhere in `haystack`.
    pub fn find(&self, haystack: &[u8]) -> Option<Match> {
        self.patterns.iter().enumerate().find_map(|(i, p)| {
            p.find(haystack).map(|mut m| {
                m.pattern = i;
                m
            })
        })
    }
}

impl From<Pattern> for PatternSet {
    fn from(pattern: Pattern) -> Self {
        Self {
            patterns: vec![pattern],
        }
    }
}

// ── Regex compilation ─────────────────────────────────────────────────────────

/// `.` matches newlines: captured command output spans lines.
fn compile_regex(pattern: &str) -> Result<Regex, PatternError> {
    Ok(RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .multi_line(false)
        .build()?)
}

/// A regex that captures everything up to the first `prompt` as group 1.
pub fn output_boundary(prompt: &str) -> Result<Pattern, PatternError> {
    Pattern::regex(&format!("(.*?){}", regex::escape(prompt)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_over_bytes() {
        let p = Pattern::regex(r"nix-repl> $").unwrap();
        assert!(p.is_match(b"Welcome\n\xffnix-repl> "));
        assert!(!p.is_match(b"nix-repl> x"));
    }

    #[test]
    fn regex_captures_are_ranges() {
        let p = Pattern::regex(r"(\w+)=(\d+)?").unwrap();
        let m = p.find(b"  key=").unwrap();
        assert_eq!(m.range(), 2..6);
        assert_eq!(m.group(1), Some(2..5));
        assert_eq!(m.group(2), None);
        assert_eq!(m.group_count(), 2);
        assert_eq!(m.group(0), None);
    }

    #[test]
    fn dot_spans_lines() {
        let p = Pattern::regex("a.b").unwrap();
        assert!(p.is_match(b"a\nb"));
    }

    #[test]
    fn literal_match() {
        let p = Pattern::literal(":p hm.config.kirby").unwrap();
        let m = p.find(b"nix-repl> :p hm.config.kirby\r\n").unwrap();
        assert_eq!(m.range(), 10..28);
        assert_eq!(m.capture(), 10..28);
        // Metacharacters are not special.
        let p = Pattern::literal("a.b").unwrap();
        assert!(!p.is_match(b"axb"));
    }

    #[test]
    fn empty_literal_rejected() {
        assert!(matches!(Pattern::literal(""), Err(PatternError::EmptyLiteral)));
    }

    #[test]
    fn invalid_regex() {
        let err = Pattern::regex("(unclosed").unwrap_err();
        assert!(matches!(err, PatternError::InvalidRegex(_)));
        assert!(err.to_string().starts_with("regex error:"));
    }

    #[test]
    fn boundary_captures_up_to_prompt() {
        let p = output_boundary("nix-repl> ").unwrap();
        let hay = b"{ a = 1; }\r\n\r\nnix-repl> ";
        let m = p.find(hay).unwrap();
        assert_eq!(&hay[m.capture()], b"{ a = 1; }\r\n\r\n");
        assert_eq!(m.end, hay.len());
    }

    #[test]
    fn boundary_escapes_metacharacters() {
        let p = output_boundary("(repl)* ").unwrap();
        let m = p.find(b"out(repl)* ").unwrap();
        assert_eq!(m.capture(), 0..3);
        assert!(!p.is_match(b"replrepl "));
    }

    #[test]
    fn set_prefers_earlier_patterns() {
        let set = PatternSet::new()
            .with(Pattern::literal("error:").unwrap())
            .with(Pattern::regex("nix-repl> ").unwrap());
        let m = set.find(b"nix-repl> error: boom").unwrap();
        assert_eq!(m.pattern, 0);
        assert_eq!(m.start, 10);
        let m = set.find(b"nix-repl> ").unwrap();
        assert_eq!(m.pattern, 1);
        assert!(set.find(b"nothing").is_none());
        assert_eq!(set.len(), 2);
    }
}
