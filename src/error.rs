//! Error taxonomy for the execution engine
//!
//! Separates fatal framework errors from per-element runtime failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on element names, including any collision suffix.
pub const MAX_NAME_LEN: usize = 192;

/// Upper bound on the numeric collision suffix.
pub const MAX_NAME_SUFFIX: u32 = 9999;

/// Fatal errors raised during tree construction or the setup pass.
///
/// These abort the run; they are never captured into a Finished event.
#[derive(Error, Debug)]
pub enum FrameworkError {
    #[error("a session is already active for this run context (call reset() between runs)")]
    SessionActive,

    #[error("suite `{path}` registered no children (permit_empty_suite allows this)")]
    EmptySuite { path: String },

    #[error("`{name}` was registered against `{expected}` while `{active}` was the active registration scope")]
    ScopeViolation {
        name: String,
        expected: String,
        active: String,
    },

    #[error("cannot derive a unique name for `{name}` in `{suite}` within {limit} bytes")]
    NameOverflow {
        name: String,
        suite: String,
        limit: usize,
    },

    #[error("invalid selection pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// What kind of runtime failure an element produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Raised by the test action itself.
    Test,
    /// The test action panicked.
    Panic,
    /// A timeout wrapping action expired.
    Timeout,
    /// A wrapping action completed without invoking its inner action.
    WrapperContract,
    /// Fixture creation or close failed.
    Fixture,
    /// Framework misuse detected at run time (e.g. fixture mode mismatch).
    Usage,
    /// The distinguished fail-fast abort.
    FailFast,
    /// A spawned child task was cancelled or crashed outside the action.
    Cancelled,
}

/// A runtime failure captured into a Finished event.
///
/// Failures are plain values so they can be cloned into events and shared
/// between the element that raised them and the engine propagating them.
/// Teardown failures that occur while a primary failure is in flight are
/// chained as suppressed causes instead of replacing it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<Failure>,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suppressed: Vec::new(),
        }
    }

    /// An ordinary test failure.
    pub fn test(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Test, message)
    }

    /// A captured panic payload.
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Panic, message)
    }

    /// A timeout raised by a timeout wrapping action.
    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("timed out after {}ms", limit.as_millis()),
        )
    }

    /// A wrapping action returned without invoking its inner action.
    pub fn wrapper_contract(path: &str) -> Self {
        Self::new(
            FailureKind::WrapperContract,
            format!("a wrapping action around `{path}` never invoked its inner action"),
        )
    }

    /// A fixture creation or close failure.
    pub fn fixture(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Fixture, message)
    }

    /// Runtime framework misuse.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Usage, message)
    }

    /// The distinguished fail-fast abort failure.
    pub fn fail_fast(threshold: usize) -> Self {
        Self::new(
            FailureKind::FailFast,
            format!("aborted after exceeding the fail-fast threshold of {threshold} failures"),
        )
    }

    /// A child task that ended without running its element.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }

    /// Whether this is the distinguished fail-fast failure.
    ///
    /// Fail-fast failures are re-raised through every enclosing layer
    /// instead of being captured at the element boundary.
    pub fn is_fail_fast(&self) -> bool {
        self.kind == FailureKind::FailFast
    }

    /// Chain another failure as a suppressed cause.
    pub fn suppress(&mut self, other: Failure) {
        self.suppressed.push(other);
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        for cause in &self.suppressed {
            write!(f, " (suppressed: {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {}

/// Fold teardown failures into a primary result.
///
/// The primary failure wins; close failures are suppressed onto it. With no
/// primary failure the first close failure is promoted and the rest are
/// suppressed onto that.
pub(crate) fn absorb_failures(
    primary: Result<(), Failure>,
    extras: Vec<Failure>,
) -> Result<(), Failure> {
    match primary {
        Ok(()) => {
            let mut iter = extras.into_iter();
            match iter.next() {
                None => Ok(()),
                Some(mut first) => {
                    for extra in iter {
                        first.suppress(extra);
                    }
                    Err(first)
                }
            }
        }
        Err(mut failure) => {
            for extra in extras {
                failure.suppress(extra);
            }
            Err(failure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_fast_detection() {
        assert!(Failure::fail_fast(3).is_fail_fast());
        assert!(!Failure::test("boom").is_fail_fast());
    }

    #[test]
    fn test_absorb_promotes_first_extra() {
        let result = absorb_failures(
            Ok(()),
            vec![Failure::fixture("close a"), Failure::fixture("close b")],
        );
        let failure = result.unwrap_err();
        assert_eq!(failure.message, "close a");
        assert_eq!(failure.suppressed.len(), 1);
        assert_eq!(failure.suppressed[0].message, "close b");
    }

    #[test]
    fn test_absorb_keeps_primary() {
        let result = absorb_failures(
            Err(Failure::test("primary")),
            vec![Failure::fixture("close a")],
        );
        let failure = result.unwrap_err();
        assert_eq!(failure.message, "primary");
        assert_eq!(failure.suppressed.len(), 1);
    }

    #[test]
    fn test_absorb_no_extras() {
        assert!(absorb_failures(Ok(()), Vec::new()).is_ok());
    }

    #[test]
    fn test_failure_roundtrip() {
        let mut failure = Failure::test("boom");
        failure.suppress(Failure::fixture("close failed"));
        let json = serde_json::to_string(&failure).unwrap();
        let back: Failure = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, FailureKind::Test);
        assert_eq!(back.suppressed.len(), 1);
    }
}
