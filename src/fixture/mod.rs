//! Scoped lazy fixtures
//!
//! A fixture is a lazily initialized, optionally closeable value owned by
//! exactly one suite. Its scope is fixed by the first access: suite-bound
//! (one shared instance, closed when the suite's execution completes) or
//! test-bound (fresh instance per test, closed when that test completes).
//! Mixing the two modes on one fixture is a usage failure.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Failure;
use crate::tree::Suite;

type InitFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, Failure>> + Send + Sync>;
type CloseFn<T> = Arc<dyn Fn(Arc<T>) -> BoxFuture<'static, Result<(), Failure>> + Send + Sync>;

/// The mode transition: `Pending` moves exactly once to one of the bound
/// states and never changes again.
enum FixtureState<T> {
    Pending,
    /// The shared suite-lifetime result. A creation failure is cached so
    /// every test awaiting this fixture fails the same way.
    SuiteBound(Result<Arc<T>, Failure>),
    TestBound,
}

struct FixtureCell<T> {
    name: String,
    owner: Weak<Suite>,
    init: InitFn<T>,
    close: Option<CloseFn<T>>,
    /// Doubles as the creation mutex: concurrent first accesses serialize
    /// here, so the initializer runs at most once per instance.
    state: Mutex<FixtureState<T>>,
}

/// Handle to a declared fixture. Cheap to clone into test actions.
pub struct FixtureHandle<T> {
    cell: Arc<FixtureCell<T>>,
}

impl<T> Clone for FixtureHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> FixtureHandle<T> {
    pub(crate) fn declare<F, Fut>(name: &str, owner: &Arc<Suite>, init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        Self {
            cell: Arc::new(FixtureCell {
                name: name.to_string(),
                owner: Arc::downgrade(owner),
                init: Arc::new(move || init().boxed()),
                close: None,
                state: Mutex::new(FixtureState::Pending),
            }),
        }
    }

    pub(crate) fn declare_closeable<F, Fut, C, CFut>(
        name: &str,
        owner: &Arc<Suite>,
        init: F,
        close: C,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
        C: Fn(Arc<T>) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = Result<(), Failure>> + Send + 'static,
    {
        Self {
            cell: Arc::new(FixtureCell {
                name: name.to_string(),
                owner: Arc::downgrade(owner),
                init: Arc::new(move || init().boxed()),
                close: Some(Arc::new(move |value| close(value).boxed())),
                state: Mutex::new(FixtureState::Pending),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Access the fixture suite-scoped: one shared instance for the whole
    /// lifetime of the owning suite, created on first access under the
    /// creation mutex and closed when the suite's execution completes.
    pub async fn per_suite(&self) -> Result<Arc<T>, Failure> {
        let mut state = self.cell.state.lock().await;
        match &*state {
            FixtureState::SuiteBound(result) => result.clone(),
            FixtureState::TestBound => Err(self.mode_mismatch("suite", "test")),
            FixtureState::Pending => {
                debug!(fixture = %self.cell.name, "creating suite-scoped fixture");
                match (self.cell.init)().await {
                    Ok(value) => {
                        let value = Arc::new(value);
                        if let Some(teardown) = self.teardown_for(value.clone()) {
                            match self.cell.owner.upgrade() {
                                Some(owner) => owner.register_fixture_teardown(teardown),
                                None => {
                                    let failure = Failure::usage(format!(
                                        "fixture `{}` outlived its owning suite",
                                        self.cell.name
                                    ));
                                    *state = FixtureState::SuiteBound(Err(failure.clone()));
                                    return Err(failure);
                                }
                            }
                        }
                        *state = FixtureState::SuiteBound(Ok(value.clone()));
                        Ok(value)
                    }
                    Err(cause) => {
                        let failure = self.creation_failure(&cause);
                        *state = FixtureState::SuiteBound(Err(failure.clone()));
                        Err(failure)
                    }
                }
            }
        }
    }

    /// Access the fixture test-scoped: a fresh instance for this test,
    /// released when the test's cumulative action completes.
    pub async fn per_test(&self, cx: &TestContext) -> Result<Arc<T>, Failure> {
        {
            let mut state = self.cell.state.lock().await;
            match &*state {
                FixtureState::SuiteBound(_) => {
                    return Err(self.mode_mismatch("test", "suite"));
                }
                FixtureState::TestBound => {}
                FixtureState::Pending => *state = FixtureState::TestBound,
            }
        }
        debug!(fixture = %self.cell.name, test = %cx.path(), "creating test-scoped fixture");
        let value = (self.cell.init)()
            .await
            .map_err(|cause| self.creation_failure(&cause))?;
        let value = Arc::new(value);
        if let Some(teardown) = self.teardown_for(value.clone()) {
            cx.register_teardown(teardown);
        }
        Ok(value)
    }

    fn creation_failure(&self, cause: &Failure) -> Failure {
        Failure::fixture(format!(
            "creating fixture `{}`: {}",
            self.cell.name, cause.message
        ))
    }

    fn mode_mismatch(&self, requested: &str, bound: &str) -> Failure {
        Failure::usage(format!(
            "fixture `{}` is {bound}-scoped; accessing it {requested}-scoped is not allowed",
            self.cell.name
        ))
    }

    fn teardown_for(&self, value: Arc<T>) -> Option<FixtureTeardown> {
        let close = self.cell.close.clone()?;
        let name = self.cell.name.clone();
        Some(FixtureTeardown {
            name: name.clone(),
            run: Box::new(move || {
                async move {
                    close(value).await.map_err(|cause| {
                        Failure::fixture(format!("closing fixture `{name}`: {}", cause.message))
                    })
                }
                .boxed()
            }),
        })
    }
}

/// A deferred close action for one created fixture instance.
pub struct FixtureTeardown {
    name: String,
    run: Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Failure>> + Send>,
}

impl FixtureTeardown {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn run(self) -> Result<(), Failure> {
        (self.run)().await
    }

    #[cfg(test)]
    pub(crate) fn noop(name: &str) -> Self {
        Self {
            name: name.to_string(),
            run: Box::new(|| async { Ok(()) }.boxed()),
        }
    }
}

/// Run a batch of teardowns in order, collecting every failure instead of
/// aborting at the first one.
pub(crate) async fn run_teardowns(teardowns: Vec<FixtureTeardown>) -> Vec<Failure> {
    let mut failures = Vec::new();
    for teardown in teardowns {
        if let Err(failure) = teardown.run().await {
            failures.push(failure);
        }
    }
    failures
}

/// Per-test execution context handed to test actions.
///
/// Collects the test-scoped fixture instances created during the test so
/// they can be released when the test completes.
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<TestContextInner>,
}

struct TestContextInner {
    path: String,
    teardowns: StdMutex<Vec<FixtureTeardown>>,
}

impl TestContext {
    pub(crate) fn new(path: String) -> Self {
        Self {
            inner: Arc::new(TestContextInner {
                path,
                teardowns: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// The running test's full path.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub(crate) fn register_teardown(&self, teardown: FixtureTeardown) {
        self.inner
            .teardowns
            .lock()
            .expect("test teardowns poisoned")
            .push(teardown);
    }

    /// Remove all registered teardowns, most recently created first.
    pub(crate) fn drain_teardowns(&self) -> Vec<FixtureTeardown> {
        let mut teardowns = std::mem::take(
            &mut *self
                .inner
                .teardowns
                .lock()
                .expect("test teardowns poisoned"),
        );
        teardowns.reverse();
        teardowns
    }
}
