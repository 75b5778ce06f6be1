//! Sessions and compartments
//!
//! A session is the single root of one run. It owns the default
//! compartment and the run's reporting and selection. Sessions are
//! validated against an explicit run context instead of global state; a
//! context allows one session until it is reset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use super::{executor, setup};
use crate::config::chain::ExecContext;
use crate::config::TestConfig;
use crate::error::{Failure, FrameworkError};
use crate::report::{ReportSink, ReporterStack};
use crate::select::Selection;
use crate::tree::{Element, Suite, SuiteKind, SuiteScope};

/// Guards the one-session-per-run invariant.
///
/// Tests that run several sessions in one process call [`RunContext::reset`]
/// between runs.
#[derive(Default)]
pub struct RunContext {
    session_active: AtomicBool,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow another session to be constructed against this context.
    pub fn reset(&self) {
        self.session_active.store(false, Ordering::SeqCst);
    }
}

/// Per-run options: selection, session-level configuration, report sinks.
#[derive(Default)]
pub struct SessionOptions {
    selection: Selection,
    config: TestConfig,
    reporters: Vec<Arc<dyn ReportSink>>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Session-level configuration, chained outside every compartment and
    /// suite (e.g. a global timeout or fail-fast threshold).
    pub fn with_config(mut self, config: TestConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a root report sink. Later sinks layer inside earlier ones.
    pub fn with_reporter(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.reporters.push(sink);
        self
    }
}

/// The root of one run.
pub struct Session {
    root: Arc<Suite>,
    default_compartment: Arc<Suite>,
    selection: Selection,
    reporters: Vec<Arc<dyn ReportSink>>,
}

impl Session {
    /// Construct the run's session. Fails if `ctx` already carries one.
    pub fn new(ctx: &RunContext, options: SessionOptions) -> Result<Session, FrameworkError> {
        if ctx.session_active.swap(true, Ordering::SeqCst) {
            return Err(FrameworkError::SessionActive);
        }
        let root = Suite::session(options.config);
        let default_compartment = make_compartment(&root, "default", TestConfig::new())?;
        Ok(Session {
            root,
            default_compartment,
            selection: options.selection,
            reporters: options.reporters,
        })
    }

    /// Create a named compartment for suites with special execution
    /// requirements. Compartments run sequentially relative to each other.
    pub fn compartment(
        &self,
        name: &str,
        config: TestConfig,
    ) -> Result<Compartment, FrameworkError> {
        Ok(Compartment {
            suite: make_compartment(&self.root, name, config)?,
        })
    }

    /// Register a top-level suite in the default compartment.
    pub fn suite<F>(&self, name: &str, content: F) -> Result<(), FrameworkError>
    where
        F: FnOnce(&SuiteScope<'_>) + Send + 'static,
    {
        self.suite_with(name, TestConfig::new(), content)
    }

    /// Register a top-level suite with an explicit configuration.
    pub fn suite_with<F>(
        &self,
        name: &str,
        config: TestConfig,
        content: F,
    ) -> Result<(), FrameworkError>
    where
        F: FnOnce(&SuiteScope<'_>) + Send + 'static,
    {
        register_top_suite(&self.default_compartment, name, config, content)
    }

    /// Run the setup pass, then execute the tree depth-first.
    ///
    /// The engine-level result is `Ok` unless a framework-fatal error
    /// aborts setup; per-test failures only show up in Finished events.
    pub async fn execute(self) -> Result<RunOutcome, FrameworkError> {
        setup::run(&self.root, &self.selection)?;

        let mut reporters = ReporterStack::new();
        for sink in &self.reporters {
            reporters.push(sink.clone());
        }
        let ctx = ExecContext::new(reporters);

        info!("executing session");
        match executor::execute(Element::Suite(self.root.clone()), ctx).await {
            Ok(()) => Ok(RunOutcome { aborted: None }),
            Err(failure) => Ok(RunOutcome {
                aborted: Some(failure),
            }),
        }
    }
}

/// Handle to a named compartment.
pub struct Compartment {
    suite: Arc<Suite>,
}

impl Compartment {
    pub fn suite<F>(&self, name: &str, content: F) -> Result<(), FrameworkError>
    where
        F: FnOnce(&SuiteScope<'_>) + Send + 'static,
    {
        self.suite_with(name, TestConfig::new(), content)
    }

    pub fn suite_with<F>(
        &self,
        name: &str,
        config: TestConfig,
        content: F,
    ) -> Result<(), FrameworkError>
    where
        F: FnOnce(&SuiteScope<'_>) + Send + 'static,
    {
        register_top_suite(&self.suite, name, config, content)
    }
}

/// What the engine knows after a run: whether a fail-fast abort cut it
/// short. Result aggregation is the report sinks' business.
#[derive(Debug)]
pub struct RunOutcome {
    aborted: Option<Failure>,
}

impl RunOutcome {
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn abort_failure(&self) -> Option<&Failure> {
        self.aborted.as_ref()
    }
}

fn make_compartment(
    root: &Arc<Suite>,
    name: &str,
    config: TestConfig,
) -> Result<Arc<Suite>, FrameworkError> {
    let unique = root.unique_child_name(name)?;
    let suite = Suite::child(
        root,
        SuiteKind::Compartment,
        unique,
        name.to_string(),
        config,
        None,
    );
    root.register_child(Element::Suite(suite.clone()));
    Ok(suite)
}

fn register_top_suite<F>(
    compartment: &Arc<Suite>,
    name: &str,
    config: TestConfig,
    content: F,
) -> Result<(), FrameworkError>
where
    F: FnOnce(&SuiteScope<'_>) + Send + 'static,
{
    let unique = compartment.unique_child_name(name)?;
    let suite = Suite::child(
        compartment,
        SuiteKind::Regular,
        unique,
        name.to_string(),
        config,
        Some(Box::new(content)),
    );
    compartment.register_child(Element::Suite(suite.clone()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InvocationMode, Invocation};
    use crate::error::FailureKind;
    use crate::report::{CollectingSink, ElementKind, TestEvent};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    fn new_session(sink: Arc<CollectingSink>) -> (RunContext, Session) {
        let ctx = RunContext::new();
        let session = Session::new(
            &ctx,
            SessionOptions::new().with_reporter(sink),
        )
        .unwrap();
        (ctx, session)
    }

    #[test]
    fn test_one_session_per_context() {
        let ctx = RunContext::new();
        let _first = Session::new(&ctx, SessionOptions::new()).unwrap();
        assert!(matches!(
            Session::new(&ctx, SessionOptions::new()),
            Err(FrameworkError::SessionActive)
        ));
        ctx.reset();
        assert!(Session::new(&ctx, SessionOptions::new()).is_ok());
    }

    #[tokio::test]
    async fn test_every_element_reports_one_pair() {
        let sink = CollectingSink::new();
        let (_ctx, session) = new_session(sink.clone());
        session
            .suite("top", |s| {
                s.test("a", |_cx| async { Ok(()) });
                s.suite_with("off", TestConfig::disabled(), |s| {
                    s.test("b", |_cx| async { Ok(()) });
                    s.test("c", |_cx| async { Err(Failure::test("never runs")) });
                });
            })
            .unwrap();
        session.execute().await.unwrap();

        let mut starts: HashMap<String, usize> = HashMap::new();
        let mut finishes: HashMap<String, usize> = HashMap::new();
        for event in sink.events() {
            match &event {
                TestEvent::Starting(e) => {
                    *starts.entry(e.element.path.clone()).or_default() += 1
                }
                TestEvent::Finished(e) => {
                    *finishes.entry(e.element.path.clone()).or_default() += 1
                }
            }
        }
        for path in ["top", "top.a", "top.off", "top.off.b", "top.off.c"] {
            assert_eq!(starts.get(path), Some(&1), "starts of {path}");
            assert_eq!(finishes.get(path), Some(&1), "finishes of {path}");
        }
        // Disabled tests finish without failure and marked disabled.
        let disabled_finish = sink
            .events()
            .into_iter()
            .find_map(|e| match e {
                TestEvent::Finished(f) if f.element.path == "top.off.c" => Some(f),
                _ => None,
            })
            .unwrap();
        assert!(disabled_finish.failure.is_none());
        assert!(!disabled_finish.element.enabled);
    }

    #[tokio::test]
    async fn test_sequential_order_is_declaration_order() {
        let sink = CollectingSink::new();
        let (_ctx, session) = new_session(sink.clone());
        session
            .suite("ordered", |s| {
                for i in 0..10 {
                    s.test(&format!("t{i}"), move |_cx| async move {
                        tokio::time::sleep(Duration::from_millis((10 - i) as u64)).await;
                        Ok(())
                    });
                }
            })
            .unwrap();
        session.execute().await.unwrap();

        let finished: Vec<String> = sink
            .finished_paths()
            .into_iter()
            .filter(|p| p.starts_with("ordered."))
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("ordered.t{i}")).collect();
        assert_eq!(finished, expected);
    }

    #[tokio::test]
    async fn test_concurrent_children_finish_before_parent() {
        let sink = CollectingSink::new();
        let (_ctx, session) = new_session(sink.clone());
        session
            .suite_with(
                "par",
                TestConfig::invocation(InvocationMode::Concurrent),
                |s| {
                    for i in 0..8 {
                        s.test(&format!("t{i}"), move |_cx| async move {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            Ok(())
                        });
                    }
                },
            )
            .unwrap();
        session.execute().await.unwrap();

        let finished = sink.finished_paths();
        assert_eq!(finished.len(), 9);
        // The parent suite finishes last; sibling order is unspecified.
        assert_eq!(finished.last().unwrap(), "par");
        let mut tests: Vec<String> = finished[..8].to_vec();
        tests.sort();
        let mut expected: Vec<String> = (0..8).map(|i| format!("par.t{i}")).collect();
        expected.sort();
        assert_eq!(tests, expected);
    }

    #[tokio::test]
    async fn test_selection_example() {
        let sink = CollectingSink::new();
        let ctx = RunContext::new();
        let session = Session::new(
            &ctx,
            SessionOptions::new()
                .with_selection(Selection::parse(Some("suite1|sub1|*"), None).unwrap())
                .with_reporter(sink.clone()),
        )
        .unwrap();
        session
            .suite("suite1", |s| {
                s.suite("sub1", |s| {
                    s.test("testA", |_cx| async { Ok(()) });
                    s.test("testB", |_cx| async { Ok(()) });
                });
                s.suite("sub2", |s| {
                    s.test("testC", |_cx| async { Ok(()) });
                });
            })
            .unwrap();
        session.execute().await.unwrap();

        let finished: Vec<String> = sink
            .finished_paths()
            .into_iter()
            .filter(|p| p.contains("test"))
            .collect();
        assert_eq!(finished, vec!["suite1.sub1.testA", "suite1.sub1.testB"]);
    }

    #[tokio::test]
    async fn test_fail_fast_threshold() {
        let sink = CollectingSink::new();
        let ctx = RunContext::new();
        let session = Session::new(
            &ctx,
            SessionOptions::new()
                .with_config(TestConfig::fail_fast(3))
                .with_reporter(sink.clone()),
        )
        .unwrap();
        session
            .suite("big", |s| {
                for i in 1..=15 {
                    s.test(&format!("t{i:02}"), move |_cx| async move {
                        if i % 2 == 0 {
                            Err(Failure::test("even test fails"))
                        } else {
                            Ok(())
                        }
                    });
                }
            })
            .unwrap();
        let outcome = session.execute().await.unwrap();
        assert!(outcome.is_aborted());

        let mut real_failures = 0;
        let mut aborted = 0;
        let mut passed = 0;
        for event in sink.events() {
            let TestEvent::Finished(f) = event else { continue };
            if f.element.kind != ElementKind::Test {
                continue;
            }
            match &f.failure {
                None => passed += 1,
                Some(failure) if failure.is_fail_fast() => aborted += 1,
                Some(_) => real_failures += 1,
            }
        }
        // Evens fail: t02 t04 t06 t08 are real failures, the fourth trips
        // the threshold of 3, and t09..t15 report the abort unrun.
        assert_eq!(real_failures, 4);
        assert_eq!(aborted, 7);
        assert_eq!(passed, 4);
    }

    #[tokio::test]
    async fn test_suite_fixture_closes_in_reverse_order_after_children() {
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = CollectingSink::new();
        let (_ctx, session) = new_session(sink);

        let log = order.clone();
        session
            .suite("fx", move |s| {
                let log_a = log.clone();
                let a = s.closeable_fixture(
                    "a",
                    || async { Ok("a") },
                    move |_| {
                        let log = log_a.clone();
                        async move {
                            log.lock().unwrap().push("close a".into());
                            Ok(())
                        }
                    },
                );
                let log_b = log.clone();
                let b = s.closeable_fixture(
                    "b",
                    || async { Ok("b") },
                    move |_| {
                        let log = log_b.clone();
                        async move {
                            log.lock().unwrap().push("close b".into());
                            Ok(())
                        }
                    },
                );
                let log_t = log.clone();
                s.test("uses_both", move |_cx| {
                    let a = a.clone();
                    let b = b.clone();
                    let log = log_t.clone();
                    async move {
                        a.per_suite().await?;
                        b.per_suite().await?;
                        log.lock().unwrap().push("test ran".into());
                        Ok(())
                    }
                });
            })
            .unwrap();
        session.execute().await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["test ran", "close b", "close a"]
        );
    }

    #[tokio::test]
    async fn test_fixture_mode_mismatch_fails_second_access_only() {
        let sink = CollectingSink::new();
        let (_ctx, session) = new_session(sink.clone());
        session
            .suite("mx", |s| {
                let fx = s.fixture("value", || async { Ok(7u32) });
                let first = fx.clone();
                s.test("first", move |cx| {
                    let fx = first.clone();
                    async move {
                        let value = fx.per_test(&cx).await?;
                        assert_eq!(*value, 7);
                        Ok(())
                    }
                });
                s.test("second", move |_cx| {
                    let fx = fx.clone();
                    async move {
                        fx.per_suite().await?;
                        Ok(())
                    }
                });
            })
            .unwrap();
        session.execute().await.unwrap();

        let results: HashMap<String, Option<FailureKind>> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                TestEvent::Finished(f) if f.element.kind == ElementKind::Test => Some((
                    f.element.path.clone(),
                    f.failure.as_ref().map(|failure| failure.kind),
                )),
                _ => None,
            })
            .collect();
        assert_eq!(results["mx.first"], None);
        assert_eq!(results["mx.second"], Some(FailureKind::Usage));
    }

    #[tokio::test]
    async fn test_traversal_wraps_every_descendant() {
        use crate::config::Traversal;
        use crate::report::ElementInfo;
        use futures::future::BoxFuture;
        use futures::FutureExt;

        struct Recorder {
            log: Arc<Mutex<Vec<String>>>,
            tag: &'static str,
        }

        impl Traversal for Recorder {
            fn around(
                &self,
                element: &ElementInfo,
                invocation: Invocation,
            ) -> BoxFuture<'static, crate::config::ExecResult> {
                let log = self.log.clone();
                let entry = format!("{}:{}", self.tag, element.path);
                async move {
                    log.lock().unwrap().push(entry);
                    invocation.proceed().await
                }
                .boxed()
            }
        }

        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = CollectingSink::new();
        let ctx = RunContext::new();
        let config = TestConfig::traverse(Arc::new(Recorder {
            log: log.clone(),
            tag: "one",
        }))
        .chain(TestConfig::traverse(Arc::new(Recorder {
            log: log.clone(),
            tag: "two",
        })));
        let session = Session::new(
            &ctx,
            SessionOptions::new()
                .with_config(config)
                .with_reporter(sink),
        )
        .unwrap();
        session
            .suite("t", |s| {
                s.test("x", |_cx| async { Ok(()) });
            })
            .unwrap();
        session.execute().await.unwrap();

        // Earlier-declared traversal is outermost, and both wrap the suite
        // and the test.
        assert_eq!(
            *log.lock().unwrap(),
            vec!["one:t", "two:t", "one:t.x", "two:t.x"]
        );
    }

    #[tokio::test]
    async fn test_panicking_test_is_captured() {
        let sink = CollectingSink::new();
        let (_ctx, session) = new_session(sink.clone());
        session
            .suite("p", |s| {
                s.test("boom", |_cx| async { panic!("kaboom") });
                s.test("fine", |_cx| async { Ok(()) });
            })
            .unwrap();
        let outcome = session.execute().await.unwrap();
        assert!(!outcome.is_aborted());

        let failures: HashMap<String, Option<FailureKind>> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                TestEvent::Finished(f) if f.element.kind == ElementKind::Test => Some((
                    f.element.path.clone(),
                    f.failure.as_ref().map(|failure| failure.kind),
                )),
                _ => None,
            })
            .collect();
        assert_eq!(failures["p.boom"], Some(FailureKind::Panic));
        assert_eq!(failures["p.fine"], None);
    }

    #[tokio::test]
    async fn test_compartments_run_sequentially() {
        let sink = CollectingSink::new();
        let (_ctx, session) = new_session(sink.clone());
        let realtime = session
            .compartment(
                "realtime",
                TestConfig::invocation(InvocationMode::Concurrent),
            )
            .unwrap();
        realtime
            .suite("rt", |s| {
                s.test("a", |_cx| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                });
                s.test("b", |_cx| async { Ok(()) });
            })
            .unwrap();
        session
            .suite("plain", |s| {
                s.test("c", |_cx| async { Ok(()) });
            })
            .unwrap();
        session.execute().await.unwrap();

        let finished = sink.finished_paths();
        // Compartments execute in registration order: default, then
        // realtime. The concurrent compartment must not start earlier.
        let plain_pos = finished.iter().position(|p| p == "plain").unwrap();
        let rt_pos = finished.iter().position(|p| p == "rt").unwrap();
        assert!(plain_pos < rt_pos);
    }
}
