//! Lifecycle event model
//!
//! The events that flow from the execution engine to report sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Failure;

/// Which variant of the element tree an event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Suite,
    Test,
}

/// A snapshot of an element at report time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementInfo {
    pub kind: ElementKind,
    /// Dot-joined path, unique within one execution.
    pub path: String,
    pub display_name: String,
    pub enabled: bool,
}

impl fmt::Display for ElementInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ElementKind::Suite => "suite",
            ElementKind::Test => "test",
        };
        write!(f, "{kind} `{}`", self.path)
    }
}

/// Reported when an element is about to execute (or is reported disabled).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartingEvent {
    pub element: ElementInfo,
    pub at: DateTime<Utc>,
}

/// Reported when an element has finished, carrying its Starting event and
/// the captured failure, if any.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinishedEvent {
    pub element: ElementInfo,
    pub starting: StartingEvent,
    pub failure: Option<Failure>,
    pub at: DateTime<Utc>,
}

impl FinishedEvent {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Wall-clock time between the Starting and Finished events.
    pub fn duration_ms(&self) -> i64 {
        (self.at - self.starting.at).num_milliseconds()
    }
}

/// The report-sink event union.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TestEvent {
    Starting(StartingEvent),
    Finished(FinishedEvent),
}

impl TestEvent {
    pub fn element(&self) -> &ElementInfo {
        match self {
            TestEvent::Starting(e) => &e.element,
            TestEvent::Finished(e) => &e.element,
        }
    }

    pub fn path(&self) -> &str {
        &self.element().path
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TestEvent::Finished(_))
    }
}

impl fmt::Display for TestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestEvent::Starting(e) => write!(f, "> {}", e.element),
            TestEvent::Finished(e) => match &e.failure {
                None => write!(f, "< {} [{}ms]", e.element, e.duration_ms()),
                Some(failure) => {
                    write!(f, "< {} [{}ms] - {failure}", e.element, e.duration_ms())
                }
            },
        }
    }
}
