//! Composable test configuration
//!
//! A `TestConfig` is an immutable value holding three independent action
//! chains: parameterizing actions (pure, applied once during setup),
//! execution-wrapping actions (async, applied at every execution), and
//! report-setup actions (reporting plumbing). Chaining two configs
//! concatenates compatible chains; within a chain, later entries nest
//! inside earlier ones.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::traversal::{Traversal, TraversalStack};
use crate::engine::FailFastState;
use crate::error::Failure;
use crate::report::{ReportSink, ReporterStack};

/// Result of one element's (possibly wrapped) execution.
pub type ExecResult = Result<(), Failure>;

/// How a suite invokes its children.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InvocationMode {
    /// Children run one after another, in declaration order.
    #[default]
    Sequential,
    /// Children run as independent concurrent tasks.
    Concurrent,
}

/// Execution-time state inherited down the tree.
///
/// Wrapping actions may modify the context carried by their [`Invocation`]
/// before proceeding; the modified context is what descendants observe.
#[derive(Clone)]
pub struct ExecContext {
    pub(crate) mode: InvocationMode,
    pub(crate) reporters: ReporterStack,
    pub(crate) traversals: TraversalStack,
    pub(crate) fail_fast: Option<Arc<FailFastState>>,
}

impl ExecContext {
    pub(crate) fn new(reporters: ReporterStack) -> Self {
        Self {
            mode: InvocationMode::default(),
            reporters,
            traversals: TraversalStack::default(),
            fail_fast: None,
        }
    }

    pub fn mode(&self) -> InvocationMode {
        self.mode
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("mode", &self.mode)
            .field("traversals", &self.traversals.len())
            .field("fail_fast", &self.fail_fast.is_some())
            .finish()
    }
}

/// The cumulative inner action handed to a wrapping action.
pub(crate) type WrappedFn =
    Box<dyn FnOnce(ExecContext) -> BoxFuture<'static, ExecResult> + Send>;

/// One execution-wrapping action.
pub(crate) type WrapAction = Arc<dyn Fn(Invocation) -> BoxFuture<'static, ExecResult> + Send + Sync>;

/// One parameterizing action, applied once during setup.
pub(crate) type ParamAction = Arc<dyn Fn(&mut SetupView) + Send + Sync>;

/// One report-setup action, extending the sink stack for a subtree.
pub(crate) type ReportAction = Arc<dyn Fn(&mut ReporterStack) + Send + Sync>;

/// A wrapping action's handle on the cumulative inner action.
///
/// The contract: call [`Invocation::proceed`] exactly once. The engine
/// checks an invocation flag after the wrapper returns; a wrapper that
/// completed normally without proceeding produces a wrapper-contract
/// failure unless the element's config carries the matching permit.
pub struct Invocation {
    ctx: ExecContext,
    invoked: Arc<AtomicBool>,
    run: WrappedFn,
}

impl Invocation {
    pub fn mode(&self) -> InvocationMode {
        self.ctx.mode
    }

    /// Change the invocation mode observed by the inner action and all
    /// descendants.
    pub fn set_mode(&mut self, mode: InvocationMode) {
        self.ctx.mode = mode;
    }

    /// Install a traversal for the inner action's subtree.
    pub fn install_traversal(&mut self, traversal: Arc<dyn Traversal>) {
        self.ctx.traversals.push(traversal);
    }

    pub(crate) fn install_fail_fast(&mut self, state: Arc<FailFastState>) {
        self.ctx.fail_fast = Some(state);
    }

    /// Run the cumulative inner action. Consumes the invocation.
    pub async fn proceed(self) -> ExecResult {
        self.invoked.store(true, Ordering::SeqCst);
        (self.run)(self.ctx).await
    }
}

/// What a parameterizing action may observe and change.
///
/// Disabling is monotonic: an element disabled here, or through an
/// ancestor, never becomes enabled again.
pub struct SetupView {
    enabled: bool,
}

impl SetupView {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }
}

/// Explicit opt-outs from setup and contract checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct Permits {
    pub empty_suite: bool,
    pub uninvoked_wrapper: bool,
}

impl Permits {
    fn merge(self, other: Permits) -> Permits {
        Permits {
            empty_suite: self.empty_suite || other.empty_suite,
            uninvoked_wrapper: self.uninvoked_wrapper || other.uninvoked_wrapper,
        }
    }
}

/// An immutable, composable configuration value.
#[derive(Clone, Default)]
pub struct TestConfig {
    parameterize: Vec<ParamAction>,
    wrappers: Vec<WrapAction>,
    report_setup: Vec<ReportAction>,
    permits: Permits,
}

impl TestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate two configs. For every action kind, `self`'s chain
    /// surrounds `other`'s: `self`'s wrappers run outside, its
    /// parameterizing and report-setup actions run first.
    pub fn chain(mut self, other: TestConfig) -> Self {
        self.parameterize.extend(other.parameterize);
        self.wrappers.extend(other.wrappers);
        self.report_setup.extend(other.report_setup);
        self.permits = self.permits.merge(other.permits);
        self
    }

    /// A config whose parameterizing action disables the element.
    pub fn disabled() -> Self {
        Self::new().with_parameterize(|view| view.disable())
    }

    /// A config that sets the invocation mode for the element's children
    /// and all descendants.
    pub fn invocation(mode: InvocationMode) -> Self {
        Self::new().with_wrapper(move |mut invocation: Invocation| {
            invocation.set_mode(mode);
            invocation.proceed()
        })
    }

    /// A config that bounds the cumulative inner action's wall-clock time.
    /// Expiry is an ordinary captured failure.
    pub fn timeout(limit: Duration) -> Self {
        Self::new().with_wrapper(move |invocation: Invocation| async move {
            match tokio::time::timeout(limit, invocation.proceed()).await {
                Ok(result) => result,
                Err(_) => Err(Failure::timeout(limit)),
            }
        })
    }

    /// A config that installs a traversal over the element's subtree.
    pub fn traverse(traversal: Arc<dyn Traversal>) -> Self {
        Self::new().with_wrapper(move |mut invocation: Invocation| {
            invocation.install_traversal(traversal.clone());
            invocation.proceed()
        })
    }

    /// A config that arms fail-fast for the element's subtree. The abort is
    /// raised when the recorded failure count exceeds `threshold`.
    pub fn fail_fast(threshold: usize) -> Self {
        let state = Arc::new(FailFastState::new(threshold));
        Self::new().with_wrapper(move |mut invocation: Invocation| {
            invocation.install_fail_fast(state.clone());
            invocation.proceed()
        })
    }

    /// A config that layers a report sink inside the inherited ones for
    /// the element's subtree.
    pub fn report_to(sink: Arc<dyn ReportSink>) -> Self {
        Self::new().with_report_setup(move |reporters| reporters.push(sink.clone()))
    }

    /// Append a custom execution-wrapping action.
    pub fn with_wrapper<F, Fut>(mut self, wrapper: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExecResult> + Send + 'static,
    {
        self.wrappers
            .push(Arc::new(move |invocation| wrapper(invocation).boxed()));
        self
    }

    /// Append a custom parameterizing action.
    pub fn with_parameterize<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut SetupView) + Send + Sync + 'static,
    {
        self.parameterize.push(Arc::new(action));
        self
    }

    /// Append a custom report-setup action.
    pub fn with_report_setup<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut ReporterStack) + Send + Sync + 'static,
    {
        self.report_setup.push(Arc::new(action));
        self
    }

    /// Allow this suite to register zero children.
    pub fn permit_empty_suite(mut self) -> Self {
        self.permits.empty_suite = true;
        self
    }

    /// Waive the proceed-exactly-once contract check for this element's
    /// wrapping actions.
    pub fn permit_uninvoked_wrapper(mut self) -> Self {
        self.permits.uninvoked_wrapper = true;
        self
    }

    pub(crate) fn permits(&self) -> Permits {
        self.permits
    }

    pub(crate) fn wrappers(&self) -> &[WrapAction] {
        &self.wrappers
    }

    /// Run the parameterizing chain over the current enabled state.
    pub(crate) fn apply_parameterize(&self, enabled: bool) -> bool {
        let mut view = SetupView::new(enabled);
        for action in &self.parameterize {
            action(&mut view);
        }
        // Monotonic: a config cannot re-enable a disabled element.
        enabled && view.is_enabled()
    }

    /// Run the report-setup chain, layering sinks innermost-last.
    pub(crate) fn apply_report_setup(&self, reporters: &mut ReporterStack) {
        for action in &self.report_setup {
            action(reporters);
        }
    }
}

impl fmt::Debug for TestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestConfig")
            .field("parameterize", &self.parameterize.len())
            .field("wrappers", &self.wrappers.len())
            .field("report_setup", &self.report_setup.len())
            .field("permits", &self.permits)
            .finish()
    }
}

/// Fold an element's wrapping actions around its primary action,
/// outermost first. Each layer gets a fresh invocation flag; a layer that
/// completes normally without proceeding fails the element with a
/// wrapper-contract failure unless waived.
pub(crate) fn compose(
    wrappers: Vec<WrapAction>,
    permits: Permits,
    path: String,
    primary: WrappedFn,
) -> WrappedFn {
    let mut action = primary;
    for wrapper in wrappers.into_iter().rev() {
        let inner = action;
        let path = path.clone();
        let waived = permits.uninvoked_wrapper;
        action = Box::new(move |ctx: ExecContext| {
            async move {
                let invoked = Arc::new(AtomicBool::new(false));
                let invocation = Invocation {
                    ctx,
                    invoked: invoked.clone(),
                    run: inner,
                };
                let result = wrapper(invocation).await;
                if result.is_ok() && !invoked.load(Ordering::SeqCst) && !waived {
                    return Err(Failure::wrapper_contract(&path));
                }
                result
            }
            .boxed()
        });
    }
    action
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn run_composed(
        wrappers: Vec<WrapAction>,
        permits: Permits,
        primary: WrappedFn,
    ) -> ExecResult {
        let ctx = ExecContext::new(ReporterStack::new());
        let composed = compose(wrappers, permits, "t".to_string(), primary);
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(composed(ctx))
    }

    fn recording_primary(log: Arc<Mutex<Vec<&'static str>>>) -> WrappedFn {
        Box::new(move |_ctx| {
            async move {
                log.lock().unwrap().push("primary");
                Ok(())
            }
            .boxed()
        })
    }

    #[test]
    fn test_chain_orders_wrappers_outer_to_inner() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let mk = |tag: &'static str, log: Arc<Mutex<Vec<&'static str>>>| {
            TestConfig::new().with_wrapper(move |invocation: Invocation| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(tag);
                    invocation.proceed().await
                }
            })
        };
        let config = mk("outer", log.clone()).chain(mk("inner", log.clone()));
        let result = run_composed(
            config.wrappers().to_vec(),
            config.permits(),
            recording_primary(log.clone()),
        );
        assert!(result.is_ok());
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner", "primary"]);
    }

    #[test]
    fn test_uninvoked_wrapper_is_contract_violation() {
        let config = TestConfig::new()
            .with_wrapper(|_invocation: Invocation| async move { Ok(()) });
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = run_composed(
            config.wrappers().to_vec(),
            config.permits(),
            recording_primary(log.clone()),
        );
        let failure = result.unwrap_err();
        assert_eq!(failure.kind, crate::error::FailureKind::WrapperContract);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_uninvoked_wrapper_permit() {
        let config = TestConfig::new()
            .with_wrapper(|_invocation: Invocation| async move { Ok(()) })
            .permit_uninvoked_wrapper();
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = run_composed(
            config.wrappers().to_vec(),
            config.permits(),
            recording_primary(log),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_failing_wrapper_keeps_own_failure() {
        let config = TestConfig::new().with_wrapper(|_invocation: Invocation| async move {
            Err(Failure::test("wrapper blew up"))
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = run_composed(
            config.wrappers().to_vec(),
            config.permits(),
            recording_primary(log),
        );
        assert_eq!(result.unwrap_err().message, "wrapper blew up");
    }

    #[test]
    fn test_parameterize_is_monotonic() {
        let disabled = TestConfig::disabled();
        assert!(!disabled.apply_parameterize(true));
        // A parent-disabled element stays disabled through an empty chain.
        assert!(!TestConfig::new().apply_parameterize(false));
    }

    #[test]
    fn test_timeout_expiry() {
        let config = TestConfig::timeout(Duration::from_millis(10));
        let primary: WrappedFn = Box::new(|_ctx| {
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
            .boxed()
        });
        let result = run_composed(config.wrappers().to_vec(), config.permits(), primary);
        assert_eq!(result.unwrap_err().kind, crate::error::FailureKind::Timeout);
    }
}
