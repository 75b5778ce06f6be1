//! Test selection
//!
//! An immutable include/exclude filter over element paths, with a
//! prefix-based pruning check that lets the setup pass skip whole subtrees
//! before their content blocks ever run.

mod pattern;

pub use pattern::{Pattern, DEFAULT_SEGMENT_SEPARATOR};

use crate::error::FrameworkError;

/// Separator between patterns in a selection spec string.
pub const PATTERN_LIST_SEPARATOR: char = ',';

/// The include/exclude filter for one run.
#[derive(Clone, Debug, Default)]
pub struct Selection {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl Selection {
    /// A selection that includes everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(includes: Vec<Pattern>, excludes: Vec<Pattern>) -> Self {
        Self { includes, excludes }
    }

    /// Parse comma-separated include and exclude spec strings.
    pub fn parse(
        include_spec: Option<&str>,
        exclude_spec: Option<&str>,
    ) -> Result<Self, FrameworkError> {
        Ok(Self {
            includes: parse_list(include_spec)?,
            excludes: parse_list(exclude_spec)?,
        })
    }

    pub fn is_unrestricted(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Whether an element with the given full path is selected: it must
    /// match at least one include pattern (or none exist) and no exclude
    /// pattern.
    pub fn includes(&self, path: &[String]) -> bool {
        let included = self.includes.is_empty()
            || self.includes.iter().any(|pattern| pattern.matches(path));
        included && !self.excludes.iter().any(|pattern| pattern.matches(path))
    }

    /// Whether any descendant of a suite with the given path could match.
    /// Root-level suites (empty path) always may-include. Only include
    /// patterns can disprove a match; excludes never prune subtrees.
    pub fn may_include(&self, suite_path: &[String]) -> bool {
        if suite_path.is_empty() || self.includes.is_empty() {
            return true;
        }
        self.includes
            .iter()
            .any(|pattern| pattern.may_match_below(suite_path))
    }
}

fn parse_list(spec: Option<&str>) -> Result<Vec<Pattern>, FrameworkError> {
    let Some(spec) = spec else {
        return Ok(Vec::new());
    };
    spec.split(PATTERN_LIST_SEPARATOR)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Pattern::parse)
        .collect()
}
