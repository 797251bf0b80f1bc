//! Patterns and the ordered first-declared-wins matcher.
//!
//! An expect call supplies patterns in declaration order, and order is
//! significant: the first declared pattern with a match anywhere in the
//! buffered content wins, regardless of where in the stream each match
//! sits. Match position never breaks a tie between patterns.

use regex::bytes::Regex;

/// A single candidate pattern: literal text or a regular expression.
///
/// Literal patterns match as a contiguous substring anywhere in the buffer
/// (searched with memchr's substring search). Regex patterns use standard
/// leftmost-first semantics over the raw bytes.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal byte sequence, matched as a substring.
    Literal(String),

    /// Compiled regular expression.
    Regex(Regex),
}

impl Pattern {
    /// Create a literal pattern.
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// Compile a regex pattern.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    /// Find the first occurrence in `haystack`, returning `(start, end)`
    /// byte offsets.
    pub fn find(&self, haystack: &[u8]) -> Option<(usize, usize)> {
        match self {
            Self::Literal(text) => memchr::memmem::find(haystack, text.as_bytes())
                .map(|start| (start, start + text.len())),
            Self::Regex(regex) => regex.find(haystack).map(|m| (m.start(), m.end())),
        }
    }

    /// Check whether the pattern occurs in `haystack`.
    pub fn is_match(&self, haystack: &[u8]) -> bool {
        self.find(haystack).is_some()
    }
}

impl From<Regex> for Pattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

/// A pattern paired with the action to run when it matches.
///
/// The action receives the consumed text: everything buffered up to and
/// including the match.
pub struct ExpectAction {
    pattern: Pattern,
    action: Box<dyn FnMut(&str) + Send>,
}

impl ExpectAction {
    /// Pair a pattern with an action.
    pub fn new(pattern: Pattern, action: impl FnMut(&str) + Send + 'static) -> Self {
        Self {
            pattern,
            action: Box::new(action),
        }
    }

    /// Convenience: literal pattern with an action.
    pub fn literal(text: impl Into<String>, action: impl FnMut(&str) + Send + 'static) -> Self {
        Self::new(Pattern::literal(text), action)
    }

    /// Convenience: regex pattern with an action.
    pub fn regex(
        pattern: &str,
        action: impl FnMut(&str) + Send + 'static,
    ) -> Result<Self, regex::Error> {
        Ok(Self::new(Pattern::regex(pattern)?, action))
    }

    /// The pattern this action is bound to.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Run the action with the consumed text.
    pub(crate) fn invoke(&mut self, text: &str) {
        (self.action)(text);
    }
}

impl std::fmt::Debug for ExpectAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpectAction")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// The span selected by a notification pass: which pattern won and the
/// byte range of its match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSpan {
    /// Index of the winning pattern in declaration order.
    pub pattern_index: usize,

    /// Match start offset in the buffer.
    pub start: usize,

    /// Match end offset in the buffer. This is the consume point.
    pub end: usize,
}

/// Evaluate `patterns` in declaration order against the full buffered
/// content. The first pattern with any match wins; later patterns are not
/// consulted even if they would match earlier in the buffer.
pub fn find_first(patterns: &[Pattern], haystack: &[u8]) -> Option<MatchSpan> {
    for (pattern_index, pattern) in patterns.iter().enumerate() {
        if let Some((start, end)) = pattern.find(haystack) {
            return Some(MatchSpan {
                pattern_index,
                start,
                end,
            });
        }
    }
    None
}
