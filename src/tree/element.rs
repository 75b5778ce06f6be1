//! Element tree nodes
//!
//! Suites and tests share a common core (name, path, enabled flag, weak
//! parent link). Parents own their children; children only hold a weak back
//! reference. Structure never changes after the setup pass.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::config::TestConfig;
use crate::error::{FrameworkError, MAX_NAME_LEN, MAX_NAME_SUFFIX};
use crate::fixture::FixtureTeardown;
use crate::report::{ElementInfo, ElementKind};
use crate::tree::scope::SuiteScope;

/// Display-path separator.
pub const PATH_SEPARATOR: char = '.';

/// Deferred suite content. Runs once during the setup pass, after the
/// pruning check, with its suite as the active registration scope.
pub(crate) type ContentFn = Box<dyn FnOnce(&SuiteScope<'_>) + Send>;

/// A test's async action. Consumed when the test runs.
pub(crate) type TestActionFn = Box<
    dyn FnOnce(
            crate::fixture::TestContext,
        ) -> futures::future::BoxFuture<'static, Result<(), crate::error::Failure>>
        + Send,
>;

/// What role a suite plays in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuiteKind {
    /// The single root of a run. Invisible in paths and reports.
    Session,
    /// A top-level isolation boundary. Invisible in paths and reports.
    Compartment,
    /// An ordinary suite.
    Regular,
}

impl SuiteKind {
    /// Session and compartment nodes do not appear in element paths.
    pub fn is_boundary(self) -> bool {
        !matches!(self, SuiteKind::Regular)
    }
}

/// State shared by both element variants.
pub(crate) struct ElementCore {
    name: String,
    display_name: String,
    parent: Weak<Suite>,
    boundary: bool,
    path: OnceLock<Vec<String>>,
    enabled: AtomicBool,
    included: AtomicBool,
}

impl ElementCore {
    fn new(name: String, display_name: String, parent: Weak<Suite>, boundary: bool) -> Self {
        Self {
            name,
            display_name,
            parent,
            boundary,
            path: OnceLock::new(),
            enabled: AtomicBool::new(true),
            included: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Path segments from the nearest top-level suite down to this element.
    ///
    /// Computed once by walking to the root; session and compartment nodes
    /// contribute nothing, so a top-level suite's path is its own name.
    pub fn path_segments(&self) -> &[String] {
        self.path.get_or_init(|| {
            if self.boundary {
                return Vec::new();
            }
            let mut segments = vec![self.name.clone()];
            let mut current = self.parent.upgrade();
            while let Some(suite) = current {
                if suite.kind().is_boundary() {
                    break;
                }
                segments.push(suite.core.name.clone());
                current = suite.core.parent.upgrade();
            }
            segments.reverse();
            segments
        })
    }

    pub fn path_string(&self) -> String {
        self.path_segments().join(&PATH_SEPARATOR.to_string())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_included(&self) -> bool {
        self.included.load(Ordering::SeqCst)
    }

    pub(crate) fn set_included(&self, included: bool) {
        self.included.store(included, Ordering::SeqCst);
    }
}

/// A suite node: owns children, may declare fixtures.
pub struct Suite {
    pub(crate) core: ElementCore,
    kind: SuiteKind,
    config: TestConfig,
    content: Mutex<Option<ContentFn>>,
    children: Mutex<Vec<Element>>,
    used_names: Mutex<HashSet<String>>,
    /// Teardown entries for suite-scoped fixtures, most recent first.
    /// Append-only during execution, drained once at suite teardown.
    fixtures: Mutex<Vec<FixtureTeardown>>,
}

impl Suite {
    /// Create the root node of a run.
    pub(crate) fn session(config: TestConfig) -> Arc<Suite> {
        Arc::new(Suite {
            core: ElementCore::new("session".into(), "session".into(), Weak::new(), true),
            kind: SuiteKind::Session,
            config,
            content: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            used_names: Mutex::new(HashSet::new()),
            fixtures: Mutex::new(Vec::new()),
        })
    }

    /// Create a child suite under `parent`. The caller must have derived a
    /// unique `name` via [`Suite::unique_child_name`] and registers the
    /// result separately.
    pub(crate) fn child(
        parent: &Arc<Suite>,
        kind: SuiteKind,
        name: String,
        display_name: String,
        config: TestConfig,
        content: Option<ContentFn>,
    ) -> Arc<Suite> {
        Arc::new(Suite {
            core: ElementCore::new(name, display_name, Arc::downgrade(parent), kind.is_boundary()),
            kind,
            config,
            content: Mutex::new(content),
            children: Mutex::new(Vec::new()),
            used_names: Mutex::new(HashSet::new()),
            fixtures: Mutex::new(Vec::new()),
        })
    }

    pub fn kind(&self) -> SuiteKind {
        self.kind
    }

    pub fn is_boundary(&self) -> bool {
        self.kind.is_boundary()
    }

    pub fn is_session(&self) -> bool {
        self.kind == SuiteKind::Session
    }

    pub(crate) fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn path_segments(&self) -> &[String] {
        self.core.path_segments()
    }

    pub fn path_string(&self) -> String {
        self.core.path_string()
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    pub fn is_included(&self) -> bool {
        self.core.is_included()
    }

    /// Derive a child name, suffixing on collision.
    ///
    /// First use of a name wins it unchanged; later uses get `name_2`,
    /// `name_3`, and so on. Names that cannot be made unique within the
    /// length and suffix bounds are a setup error.
    pub(crate) fn unique_child_name(&self, original: &str) -> Result<String, FrameworkError> {
        if original.len() > MAX_NAME_LEN {
            return Err(self.name_overflow(original));
        }
        let mut used = self.used_names.lock().expect("name registry poisoned");
        if used.insert(original.to_string()) {
            return Ok(original.to_string());
        }
        for suffix in 2..=MAX_NAME_SUFFIX {
            let candidate = format!("{original}_{suffix}");
            if candidate.len() > MAX_NAME_LEN {
                return Err(self.name_overflow(original));
            }
            if used.insert(candidate.clone()) {
                return Ok(candidate);
            }
        }
        Err(self.name_overflow(original))
    }

    /// Human-readable identity for error messages: the path when visible,
    /// otherwise the node's own name.
    pub(crate) fn describe_for_error(&self) -> String {
        self.describe()
    }

    fn name_overflow(&self, original: &str) -> FrameworkError {
        FrameworkError::NameOverflow {
            name: original.to_string(),
            suite: self.describe(),
            limit: MAX_NAME_LEN,
        }
    }

    fn describe(&self) -> String {
        let path = self.path_string();
        if path.is_empty() {
            self.core.name().to_string()
        } else {
            path
        }
    }

    pub(crate) fn register_child(&self, element: Element) {
        self.children
            .lock()
            .expect("children poisoned")
            .push(element);
    }

    pub(crate) fn children_snapshot(&self) -> Vec<Element> {
        self.children.lock().expect("children poisoned").clone()
    }

    pub(crate) fn children_len(&self) -> usize {
        self.children.lock().expect("children poisoned").len()
    }

    pub(crate) fn take_content(&self) -> Option<ContentFn> {
        self.content.lock().expect("content poisoned").take()
    }

    pub(crate) fn retain_included_children(&self) {
        self.children
            .lock()
            .expect("children poisoned")
            .retain(|child| child.is_included());
    }

    pub(crate) fn has_enabled_children(&self) -> bool {
        self.children
            .lock()
            .expect("children poisoned")
            .iter()
            .any(|child| child.is_enabled())
    }

    pub(crate) fn has_included_children(&self) -> bool {
        self.children
            .lock()
            .expect("children poisoned")
            .iter()
            .any(|child| child.is_included())
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.core.set_enabled(enabled);
    }

    pub(crate) fn set_included(&self, included: bool) {
        self.core.set_included(included);
    }

    /// Record a created suite-scoped fixture at the front of the teardown
    /// list, so teardown runs in reverse creation order.
    pub(crate) fn register_fixture_teardown(&self, teardown: FixtureTeardown) {
        self.fixtures
            .lock()
            .expect("fixtures poisoned")
            .insert(0, teardown);
    }

    /// Remove and return all registered teardowns, front to back.
    pub(crate) fn drain_fixture_teardowns(&self) -> Vec<FixtureTeardown> {
        std::mem::take(&mut *self.fixtures.lock().expect("fixtures poisoned"))
    }

    pub(crate) fn info(&self) -> ElementInfo {
        ElementInfo {
            kind: ElementKind::Suite,
            path: self.path_string(),
            display_name: self.core.display_name().to_string(),
            enabled: self.is_enabled(),
        }
    }
}

/// A test node: a leaf holding one async action.
pub struct Test {
    pub(crate) core: ElementCore,
    config: TestConfig,
    action: Mutex<Option<TestActionFn>>,
}

impl Test {
    pub(crate) fn child(
        parent: &Arc<Suite>,
        name: String,
        display_name: String,
        config: TestConfig,
        action: TestActionFn,
    ) -> Arc<Test> {
        Arc::new(Test {
            core: ElementCore::new(name, display_name, Arc::downgrade(parent), false),
            config,
            action: Mutex::new(Some(action)),
        })
    }

    pub(crate) fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn path_segments(&self) -> &[String] {
        self.core.path_segments()
    }

    pub fn path_string(&self) -> String {
        self.core.path_string()
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    pub fn is_included(&self) -> bool {
        self.core.is_included()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.core.set_enabled(enabled);
    }

    pub(crate) fn set_included(&self, included: bool) {
        self.core.set_included(included);
    }

    pub(crate) fn take_action(&self) -> Option<TestActionFn> {
        self.action.lock().expect("action poisoned").take()
    }

    pub(crate) fn info(&self) -> ElementInfo {
        ElementInfo {
            kind: ElementKind::Test,
            path: self.path_string(),
            display_name: self.core.display_name().to_string(),
            enabled: self.is_enabled(),
        }
    }
}

/// A node in the test tree.
#[derive(Clone)]
pub enum Element {
    Suite(Arc<Suite>),
    Test(Arc<Test>),
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Suite(_) => ElementKind::Suite,
            Element::Test(_) => ElementKind::Test,
        }
    }

    pub fn path_segments(&self) -> &[String] {
        match self {
            Element::Suite(s) => s.path_segments(),
            Element::Test(t) => t.path_segments(),
        }
    }

    pub fn path_string(&self) -> String {
        match self {
            Element::Suite(s) => s.path_string(),
            Element::Test(t) => t.path_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            Element::Suite(s) => s.is_enabled(),
            Element::Test(t) => t.is_enabled(),
        }
    }

    pub fn is_included(&self) -> bool {
        match self {
            Element::Suite(s) => s.is_included(),
            Element::Test(t) => t.is_included(),
        }
    }

    pub(crate) fn info(&self) -> ElementInfo {
        match self {
            Element::Suite(s) => s.info(),
            Element::Test(t) => t.info(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Arc<Suite> {
        Suite::session(TestConfig::new())
    }

    fn compartment(session: &Arc<Suite>) -> Arc<Suite> {
        let suite = Suite::child(
            session,
            SuiteKind::Compartment,
            "default".into(),
            "default".into(),
            TestConfig::new(),
            None,
        );
        session.register_child(Element::Suite(suite.clone()));
        suite
    }

    #[test]
    fn test_unique_names() {
        let session = root();
        assert_eq!(session.unique_child_name("alpha").unwrap(), "alpha");
        assert_eq!(session.unique_child_name("alpha").unwrap(), "alpha_2");
        assert_eq!(session.unique_child_name("alpha").unwrap(), "alpha_3");
        assert_eq!(session.unique_child_name("beta").unwrap(), "beta");
    }

    #[test]
    fn test_unique_name_respects_claimed_suffix() {
        let session = root();
        assert_eq!(session.unique_child_name("a_2").unwrap(), "a_2");
        assert_eq!(session.unique_child_name("a").unwrap(), "a");
        // "a_2" is taken, so the second "a" skips to "a_3".
        assert_eq!(session.unique_child_name("a").unwrap(), "a_3");
    }

    #[test]
    fn test_name_length_overflow() {
        let session = root();
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            session.unique_child_name(&long),
            Err(FrameworkError::NameOverflow { .. })
        ));
    }

    #[test]
    fn test_paths_skip_boundaries() {
        let session = root();
        let comp = compartment(&session);
        let top = Suite::child(
            &comp,
            SuiteKind::Regular,
            "top".into(),
            "top".into(),
            TestConfig::new(),
            None,
        );
        comp.register_child(Element::Suite(top.clone()));
        let nested = Suite::child(
            &top,
            SuiteKind::Regular,
            "nested".into(),
            "nested".into(),
            TestConfig::new(),
            None,
        );
        top.register_child(Element::Suite(nested.clone()));

        assert_eq!(session.path_string(), "");
        assert_eq!(comp.path_string(), "");
        assert_eq!(top.path_string(), "top");
        assert_eq!(nested.path_string(), "top.nested");
    }

    #[test]
    fn test_fixture_teardown_order() {
        let session = root();
        session.register_fixture_teardown(FixtureTeardown::noop("first"));
        session.register_fixture_teardown(FixtureTeardown::noop("second"));
        let drained = session.drain_fixture_teardowns();
        let names: Vec<_> = drained.iter().map(|t| t.name().to_string()).collect();
        // Most recently created closes first.
        assert_eq!(names, vec!["second", "first"]);
        assert!(session.drain_fixture_teardowns().is_empty());
    }
}
