//! Run summary aggregation
//!
//! A convenience sink that folds Finished events into per-run totals.
//! The engine-level result does not depend on this; it exists for tooling
//! that wants a quick table instead of consuming raw events.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};

use super::event::{ElementKind, FinishedEvent, TestEvent};
use super::sink::ReportSink;
use crate::error::FailureKind;

/// Aggregated counts over the test-level Finished events of one run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub disabled: usize,
    pub aborted: usize,
    pub total_duration_ms: i64,
    pub failures: Vec<FinishedEvent>,
}

impl RunSummary {
    /// Fold a stream of events into a summary. Suite events are ignored;
    /// only tests count toward the totals.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a TestEvent>) -> Self {
        let mut summary = RunSummary::default();
        for event in events {
            let TestEvent::Finished(finished) = event else {
                continue;
            };
            if finished.element.kind != ElementKind::Test {
                continue;
            }
            summary.record(finished);
        }
        summary
    }

    fn record(&mut self, finished: &FinishedEvent) {
        self.total += 1;
        self.total_duration_ms += finished.duration_ms();
        match &finished.failure {
            None if !finished.element.enabled => self.disabled += 1,
            None => self.passed += 1,
            Some(failure) if failure.kind == FailureKind::FailFast => {
                self.aborted += 1;
                self.failures.push(finished.clone());
            }
            Some(_) => {
                self.failed += 1;
                self.failures.push(finished.clone());
            }
        }
    }

    pub fn pass_rate(&self) -> f64 {
        let ran = self.total - self.disabled;
        if ran == 0 {
            0.0
        } else {
            (self.passed as f64 / ran as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.failed == 0 && self.aborted == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for failure in &self.failures {
            if let Some(cause) = &failure.failure {
                writeln!(f, "  ✗ {} - {cause}", failure.element.path)?;
            }
        }
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Disabled: {} | Aborted: {}",
            self.total, self.passed, self.failed, self.disabled, self.aborted
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}

/// A sink that maintains a [`RunSummary`] incrementally.
#[derive(Default)]
pub struct SummarySink {
    summary: Mutex<RunSummary>,
}

impl SummarySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn summary(&self) -> RunSummary {
        self.summary.lock().expect("summary sink poisoned").clone()
    }
}

impl ReportSink for SummarySink {
    fn add(&self, event: &TestEvent) {
        let TestEvent::Finished(finished) = event else {
            return;
        };
        if finished.element.kind != ElementKind::Test {
            return;
        }
        self.summary
            .lock()
            .expect("summary sink poisoned")
            .record(finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;
    use crate::report::event::{ElementInfo, StartingEvent};
    use chrono::Utc;

    fn finished(path: &str, enabled: bool, failure: Option<Failure>) -> TestEvent {
        let element = ElementInfo {
            kind: ElementKind::Test,
            path: path.to_string(),
            display_name: path.to_string(),
            enabled,
        };
        let starting = StartingEvent {
            element: element.clone(),
            at: Utc::now(),
        };
        TestEvent::Finished(FinishedEvent {
            element,
            starting,
            failure,
            at: Utc::now(),
        })
    }

    #[test]
    fn test_summary_counts() {
        let events = vec![
            finished("a", true, None),
            finished("b", true, Some(Failure::test("boom"))),
            finished("c", false, None),
            finished("d", true, Some(Failure::fail_fast(1))),
        ];
        let summary = RunSummary::from_events(&events);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.disabled, 1);
        assert_eq!(summary.aborted, 1);
        assert!(!summary.is_all_passed());
    }

    #[test]
    fn test_pass_rate_excludes_disabled() {
        let events = vec![finished("a", true, None), finished("b", false, None)];
        let summary = RunSummary::from_events(&events);
        assert!((summary.pass_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_sink_ignores_suites() {
        let sink = SummarySink::new();
        let element = ElementInfo {
            kind: ElementKind::Suite,
            path: "s".to_string(),
            display_name: "s".to_string(),
            enabled: true,
        };
        let starting = StartingEvent {
            element: element.clone(),
            at: Utc::now(),
        };
        sink.add(&TestEvent::Finished(FinishedEvent {
            element,
            starting,
            failure: None,
            at: Utc::now(),
        }));
        assert_eq!(sink.summary().total, 0);
    }
}
