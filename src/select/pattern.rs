//! Selection pattern grammar
//!
//! One pattern is a list of path segments. An optional leading non-letter
//! character chooses that pattern's segment separator (default `|`).
//! Within a segment, `*` is an any-suffix wildcard: everything from the
//! first `*` on matches arbitrarily.

use crate::error::FrameworkError;

/// Default segment separator when a pattern does not pick its own.
pub const DEFAULT_SEGMENT_SEPARATOR: char = '|';

/// One segment matcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Segment {
    /// Matches exactly this text.
    Literal(String),
    /// Matches any segment starting with this prefix (from `prefix*`).
    /// An empty prefix (bare `*`) matches any segment.
    Prefix(String),
}

impl Segment {
    fn parse(text: &str) -> Segment {
        match text.find('*') {
            Some(index) => Segment::Prefix(text[..index].to_string()),
            None => Segment::Literal(text.to_string()),
        }
    }

    pub(crate) fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(text) => segment == text,
            Segment::Prefix(prefix) => segment.starts_with(prefix.as_str()),
        }
    }

    fn is_literal(&self) -> bool {
        matches!(self, Segment::Literal(_))
    }
}

/// A parsed selection pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parse one pattern. A leading character that is neither alphanumeric
    /// nor `*` nor `_` selects the segment separator for this pattern.
    pub fn parse(raw: &str) -> Result<Pattern, FrameworkError> {
        if raw.is_empty() {
            return Err(FrameworkError::InvalidPattern {
                pattern: raw.to_string(),
                reason: "empty pattern".to_string(),
            });
        }
        let mut chars = raw.chars();
        let first = chars.next().expect("non-empty pattern");
        let (separator, body) = if !first.is_alphanumeric() && first != '*' && first != '_' {
            (first, chars.as_str())
        } else {
            (DEFAULT_SEGMENT_SEPARATOR, raw)
        };
        if body.is_empty() {
            return Err(FrameworkError::InvalidPattern {
                pattern: raw.to_string(),
                reason: "pattern has a separator but no segments".to_string(),
            });
        }
        let segments: Vec<Segment> = body.split(separator).map(Segment::parse).collect();
        if segments.iter().any(|s| *s == Segment::Literal(String::new())) {
            return Err(FrameworkError::InvalidPattern {
                pattern: raw.to_string(),
                reason: "empty path segment".to_string(),
            });
        }
        Ok(Pattern {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether a full element path matches this pattern. Matching is
    /// segment-wise and requires equal segment counts.
    pub fn matches(&self, path: &[String]) -> bool {
        self.segments.len() == path.len()
            && self
                .segments
                .iter()
                .zip(path)
                .all(|(segment, part)| segment.matches(part))
    }

    /// Whether some descendant of a suite with path `prefix` could still
    /// match. Compares the pattern against the suite's path prefix; the
    /// wildcard-free literal prefix is what can actually disprove a match.
    pub fn may_match_below(&self, prefix: &[String]) -> bool {
        if prefix.len() >= self.segments.len() {
            // Descendant paths are strictly longer than the suite's, so
            // they would exceed this pattern's segment count.
            return false;
        }
        self.segments
            .iter()
            .zip(prefix)
            .all(|(segment, part)| segment.matches(part))
    }

    /// The longest wildcard-free literal prefix, for diagnostics.
    pub(crate) fn literal_prefix(&self) -> Vec<&str> {
        self.segments
            .iter()
            .take_while(|s| s.is_literal())
            .map(|s| match s {
                Segment::Literal(text) => text.as_str(),
                Segment::Prefix(_) => unreachable!("take_while stopped at literals"),
            })
            .collect()
    }
}
