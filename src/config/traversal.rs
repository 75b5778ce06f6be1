//! Subtree traversals
//!
//! A traversal is a wrapping behavior that applies to every element of a
//! subtree, not just the element whose configuration declared it. Active
//! traversals travel down the call stack inside the execution context and
//! nest outside-in in declaration order.

use futures::future::BoxFuture;
use std::sync::Arc;

use super::chain::{ExecResult, Invocation, WrapAction};
use crate::report::ElementInfo;

/// A wrapping behavior applied uniformly to every descendant element.
///
/// Like any execution-wrapping action, `around` must invoke its inner
/// action exactly once by calling [`Invocation::proceed`].
pub trait Traversal: Send + Sync {
    fn around(&self, element: &ElementInfo, invocation: Invocation)
        -> BoxFuture<'static, ExecResult>;
}

/// The ordered set of traversals active for the current subtree,
/// outermost-declared first.
#[derive(Clone, Default)]
pub(crate) struct TraversalStack {
    active: Vec<Arc<dyn Traversal>>,
}

impl TraversalStack {
    pub(crate) fn push(&mut self, traversal: Arc<dyn Traversal>) {
        self.active.push(traversal);
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }

    /// Materialize the active traversals as wrapping actions around one
    /// element. The earliest-declared traversal ends up outermost.
    pub(crate) fn wrappers_for(&self, element: &ElementInfo) -> Vec<WrapAction> {
        self.active
            .iter()
            .map(|traversal| {
                let traversal = traversal.clone();
                let element = element.clone();
                let action: WrapAction =
                    Arc::new(move |invocation| traversal.around(&element, invocation));
                action
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    struct Noop;

    impl Traversal for Noop {
        fn around(
            &self,
            _element: &ElementInfo,
            invocation: Invocation,
        ) -> BoxFuture<'static, ExecResult> {
            invocation.proceed().boxed()
        }
    }

    #[test]
    fn test_stack_preserves_declaration_order() {
        let mut stack = TraversalStack::default();
        stack.push(Arc::new(Noop));
        stack.push(Arc::new(Noop));
        assert_eq!(stack.len(), 2);

        let element = ElementInfo {
            kind: crate::report::ElementKind::Test,
            path: "t".into(),
            display_name: "t".into(),
            enabled: true,
        };
        assert_eq!(stack.wrappers_for(&element).len(), 2);
    }
}
