//! Fail-fast accounting
//!
//! Shared state armed by `TestConfig::fail_fast`. Counts ordinary test
//! failures; once the count exceeds the threshold, a single distinguished
//! abort failure is minted and every not-yet-started element reports it
//! instead of running.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::error::Failure;

pub struct FailFastState {
    threshold: usize,
    failures: AtomicUsize,
    abort: OnceLock<Failure>,
}

impl FailFastState {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            failures: AtomicUsize::new(0),
            abort: OnceLock::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Record one ordinary test failure. Returns the abort failure when
    /// this failure pushed the count past the threshold (or the state was
    /// already tripped).
    pub(crate) fn record_failure(&self) -> Option<Failure> {
        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.threshold {
            Some(
                self.abort
                    .get_or_init(|| Failure::fail_fast(self.threshold))
                    .clone(),
            )
        } else {
            None
        }
    }

    /// The shared abort failure, if the threshold has been exceeded.
    pub(crate) fn tripped(&self) -> Option<Failure> {
        self.abort.get().cloned()
    }
}
