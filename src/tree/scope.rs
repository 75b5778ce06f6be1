//! Registration scopes
//!
//! Content blocks run with their suite pushed as the innermost registration
//! scope. Registering against any other suite while a block is active is a
//! usage error and aborts setup.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use crate::config::TestConfig;
use crate::error::{Failure, FrameworkError};
use crate::fixture::{FixtureHandle, TestContext};
use crate::tree::element::{Element, Suite, SuiteKind, TestActionFn};

/// Mutable state of one setup pass. Single threaded; the stack mirrors the
/// nesting of content blocks currently executing.
pub(crate) struct SetupState {
    stack: RefCell<Vec<Arc<Suite>>>,
    fatal: RefCell<Option<FrameworkError>>,
}

impl SetupState {
    pub(crate) fn new() -> Self {
        Self {
            stack: RefCell::new(Vec::new()),
            fatal: RefCell::new(None),
        }
    }

    pub(crate) fn push_scope(&self, suite: Arc<Suite>) {
        self.stack.borrow_mut().push(suite);
    }

    pub(crate) fn pop_scope(&self) {
        self.stack.borrow_mut().pop();
    }

    /// Record a fatal setup error. The first one wins.
    pub(crate) fn record_fatal(&self, error: FrameworkError) {
        let mut fatal = self.fatal.borrow_mut();
        if fatal.is_none() {
            *fatal = Some(error);
        }
    }

    pub(crate) fn take_fatal(&self) -> Option<FrameworkError> {
        self.fatal.borrow_mut().take()
    }

    /// True when `suite` is the innermost registration scope. Otherwise
    /// records a scope violation and returns false.
    fn ensure_active(&self, suite: &Arc<Suite>, name: &str) -> bool {
        let stack = self.stack.borrow();
        match stack.last() {
            Some(top) if Arc::ptr_eq(top, suite) => true,
            Some(top) => {
                let active = top_describe(top);
                drop(stack);
                self.record_fatal(FrameworkError::ScopeViolation {
                    name: name.to_string(),
                    expected: suite.describe_for_error(),
                    active,
                });
                false
            }
            None => {
                drop(stack);
                self.record_fatal(FrameworkError::ScopeViolation {
                    name: name.to_string(),
                    expected: suite.describe_for_error(),
                    active: "<no active scope>".to_string(),
                });
                false
            }
        }
    }
}

fn top_describe(suite: &Arc<Suite>) -> String {
    suite.describe_for_error()
}

/// Handle passed into a suite's content block. Registers children and
/// fixtures against that suite while it is the active scope.
pub struct SuiteScope<'a> {
    state: &'a SetupState,
    suite: Arc<Suite>,
}

impl<'a> SuiteScope<'a> {
    pub(crate) fn new(state: &'a SetupState, suite: Arc<Suite>) -> Self {
        Self { state, suite }
    }

    /// Register a child suite with default configuration.
    pub fn suite<F>(&self, name: &str, content: F)
    where
        F: FnOnce(&SuiteScope<'_>) + Send + 'static,
    {
        self.suite_with(name, TestConfig::new(), content);
    }

    /// Register a child suite with an explicit configuration.
    pub fn suite_with<F>(&self, name: &str, config: TestConfig, content: F)
    where
        F: FnOnce(&SuiteScope<'_>) + Send + 'static,
    {
        if !self.state.ensure_active(&self.suite, name) {
            return;
        }
        let unique = match self.suite.unique_child_name(name) {
            Ok(unique) => unique,
            Err(error) => {
                self.state.record_fatal(error);
                return;
            }
        };
        debug!(suite = %unique, "registering suite");
        let child = Suite::child(
            &self.suite,
            SuiteKind::Regular,
            unique,
            name.to_string(),
            config,
            Some(Box::new(content)),
        );
        self.suite.register_child(Element::Suite(child));
    }

    /// Register a test with default configuration.
    pub fn test<F, Fut>(&self, name: &str, action: F)
    where
        F: FnOnce(TestContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Failure>> + Send + 'static,
    {
        self.test_with(name, TestConfig::new(), action);
    }

    /// Register a test with an explicit configuration.
    pub fn test_with<F, Fut>(&self, name: &str, config: TestConfig, action: F)
    where
        F: FnOnce(TestContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Failure>> + Send + 'static,
    {
        if !self.state.ensure_active(&self.suite, name) {
            return;
        }
        let unique = match self.suite.unique_child_name(name) {
            Ok(unique) => unique,
            Err(error) => {
                self.state.record_fatal(error);
                return;
            }
        };
        let boxed: TestActionFn = Box::new(move |cx| action(cx).boxed());
        let child = crate::tree::element::Test::child(
            &self.suite,
            unique,
            name.to_string(),
            config,
            boxed,
        );
        self.suite.register_child(Element::Test(child));
    }

    /// Declare a lazily initialized fixture owned by this suite.
    pub fn fixture<T, F, Fut>(&self, name: &str, init: F) -> FixtureHandle<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        self.state.ensure_active(&self.suite, name);
        FixtureHandle::declare(name, &self.suite, init)
    }

    /// Declare a fixture with a close action, run at the end of the owning
    /// scope in reverse creation order.
    pub fn closeable_fixture<T, F, Fut, C, CFut>(
        &self,
        name: &str,
        init: F,
        close: C,
    ) -> FixtureHandle<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
        C: Fn(Arc<T>) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = Result<(), Failure>> + Send + 'static,
    {
        self.state.ensure_active(&self.suite, name);
        FixtureHandle::declare_closeable(name, &self.suite, init, close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_regular(name: &str) -> (Arc<Suite>, Arc<Suite>) {
        let session = Suite::session(TestConfig::new());
        let suite = Suite::child(
            &session,
            SuiteKind::Regular,
            name.to_string(),
            name.to_string(),
            TestConfig::new(),
            None,
        );
        session.register_child(Element::Suite(suite.clone()));
        (session, suite)
    }

    #[test]
    fn test_registration_in_active_scope() {
        let (_session, suite) = session_with_regular("top");
        let state = SetupState::new();
        state.push_scope(suite.clone());
        let scope = SuiteScope::new(&state, suite.clone());
        scope.test("works", |_cx| async { Ok(()) });
        state.pop_scope();
        assert!(state.take_fatal().is_none());
        assert_eq!(suite.children_len(), 1);
    }

    #[test]
    fn test_registration_against_outer_scope_is_fatal() {
        let (_session, outer) = session_with_regular("outer");
        let inner = Suite::child(
            &outer,
            SuiteKind::Regular,
            "inner".into(),
            "inner".into(),
            TestConfig::new(),
            None,
        );
        outer.register_child(Element::Suite(inner.clone()));

        let state = SetupState::new();
        state.push_scope(outer.clone());
        state.push_scope(inner);
        // `outer` is no longer the innermost scope.
        let scope = SuiteScope::new(&state, outer.clone());
        scope.test("misplaced", |_cx| async { Ok(()) });

        assert!(matches!(
            state.take_fatal(),
            Some(FrameworkError::ScopeViolation { .. })
        ));
    }

    #[test]
    fn test_first_fatal_wins() {
        let state = SetupState::new();
        state.record_fatal(FrameworkError::SessionActive);
        state.record_fatal(FrameworkError::EmptySuite {
            path: "x".to_string(),
        });
        assert!(matches!(
            state.take_fatal(),
            Some(FrameworkError::SessionActive)
        ));
    }
}
