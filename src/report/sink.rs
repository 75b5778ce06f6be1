//! Report sink contract
//!
//! The abstract interface through which lifecycle events leave the engine,
//! plus the layered sink stack and two stock sinks.

use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::event::{ElementInfo, FinishedEvent, StartingEvent, TestEvent};
use crate::error::Failure;

/// Consumes lifecycle events.
///
/// Sinks are supplied via configuration and may be layered: a subtree can
/// add its own sinks on top of those inherited from enclosing scopes. Sinks
/// must tolerate being called from concurrently executing elements.
pub trait ReportSink: Send + Sync {
    fn add(&self, event: &TestEvent);
}

/// The ordered set of sinks active for one subtree.
///
/// Sinks are held outermost-declared first. Starting events visit sinks in
/// that order; Finished events visit them innermost first.
#[derive(Clone, Default)]
pub struct ReporterStack {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl ReporterStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer a sink inside all currently registered ones.
    pub fn push(&mut self, sink: Arc<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Build and emit a Starting event, outermost sink first.
    pub(crate) fn starting(&self, element: ElementInfo) -> StartingEvent {
        let starting = StartingEvent {
            element,
            at: Utc::now(),
        };
        let event = TestEvent::Starting(starting.clone());
        for sink in &self.sinks {
            sink.add(&event);
        }
        starting
    }

    /// Build and emit the matching Finished event, innermost sink first.
    pub(crate) fn finished(
        &self,
        starting: StartingEvent,
        failure: Option<Failure>,
    ) -> FinishedEvent {
        let finished = FinishedEvent {
            element: starting.element.clone(),
            starting,
            failure,
            at: Utc::now(),
        };
        let event = TestEvent::Finished(finished.clone());
        for sink in self.sinks.iter().rev() {
            sink.add(&event);
        }
        finished
    }
}

impl fmt::Debug for ReporterStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterStack")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Collects every event into memory. Useful for assertions and aggregation.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<TestEvent>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all events seen so far, in arrival order.
    pub fn events(&self) -> Vec<TestEvent> {
        self.events.lock().expect("collecting sink poisoned").clone()
    }

    /// Paths of Finished events, in arrival order.
    pub fn finished_paths(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.is_finished())
            .map(|e| e.path().to_string())
            .collect()
    }
}

impl ReportSink for CollectingSink {
    fn add(&self, event: &TestEvent) {
        self.events
            .lock()
            .expect("collecting sink poisoned")
            .push(event.clone());
    }
}

/// Forwards events to the `tracing` subscriber.
#[derive(Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl ReportSink for TracingSink {
    fn add(&self, event: &TestEvent) {
        match event {
            TestEvent::Starting(e) => debug!(path = %e.element.path, "starting"),
            TestEvent::Finished(e) => match &e.failure {
                None => info!(path = %e.element.path, duration_ms = e.duration_ms(), "finished"),
                Some(failure) => warn!(
                    path = %e.element.path,
                    duration_ms = e.duration_ms(),
                    %failure,
                    "finished with failure"
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::event::ElementKind;

    fn info(path: &str) -> ElementInfo {
        ElementInfo {
            kind: ElementKind::Test,
            path: path.to_string(),
            display_name: path.to_string(),
            enabled: true,
        }
    }

    struct TaggingSink {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ReportSink for TaggingSink {
        fn add(&self, event: &TestEvent) {
            let label = if event.is_finished() { "finish" } else { "start" };
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.tag, label));
        }
    }

    #[test]
    fn test_layered_sink_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ReporterStack::new();
        stack.push(Arc::new(TaggingSink {
            tag: "outer",
            log: log.clone(),
        }));
        stack.push(Arc::new(TaggingSink {
            tag: "inner",
            log: log.clone(),
        }));

        let starting = stack.starting(info("a"));
        stack.finished(starting, None);

        let seen = log.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec!["outer:start", "inner:start", "inner:finish", "outer:finish"]
        );
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        let mut stack = ReporterStack::new();
        stack.push(sink.clone());

        let starting = stack.starting(info("x.y"));
        stack.finished(starting, Some(Failure::test("boom")));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(sink.finished_paths(), vec!["x.y"]);
    }
}
