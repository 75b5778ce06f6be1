//! The setup pass
//!
//! Runs once before any execution. Walks the tree top-down: prunes suites
//! the selection can prove empty, runs content blocks under registration
//! scope, applies parameterizing actions, then derives inclusion and
//! enablement bottom-up.

use std::sync::Arc;
use tracing::debug;

use crate::error::FrameworkError;
use crate::select::Selection;
use crate::tree::{Element, SetupState, Suite, SuiteScope};

pub(crate) fn run(root: &Arc<Suite>, selection: &Selection) -> Result<(), FrameworkError> {
    let state = SetupState::new();
    setup_suite(root, selection, &state, true)?;
    match state.take_fatal() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn setup_suite(
    suite: &Arc<Suite>,
    selection: &Selection,
    state: &SetupState,
    parent_enabled: bool,
) -> Result<(), FrameworkError> {
    // Prune before the content block runs: child elements of a provably
    // unselectable subtree are never even constructed.
    if !suite.is_boundary() && !selection.may_include(suite.path_segments()) {
        debug!(path = %suite.path_string(), "pruned by selection");
        suite.set_included(false);
        return Ok(());
    }

    if let Some(content) = suite.take_content() {
        state.push_scope(suite.clone());
        content(&SuiteScope::new(state, suite.clone()));
        state.pop_scope();
        if let Some(error) = state.take_fatal() {
            return Err(error);
        }
        if suite.children_len() == 0 && !suite.config().permits().empty_suite {
            return Err(FrameworkError::EmptySuite {
                path: suite.path_string(),
            });
        }
    }

    let enabled = suite
        .config()
        .apply_parameterize(parent_enabled && suite.is_enabled());
    suite.set_enabled(enabled);

    let had_children = suite.children_len() > 0;
    for child in suite.children_snapshot() {
        match child {
            Element::Suite(child_suite) => {
                setup_suite(&child_suite, selection, state, enabled)?;
            }
            Element::Test(test) => {
                let test_enabled = test.config().apply_parameterize(enabled);
                test.set_enabled(test_enabled);
                test.set_included(selection.includes(test.path_segments()));
            }
        }
    }

    // Bottom-up derivation. A suite that retained no included children is
    // itself excluded; one with no enabled child left reports disabled.
    // Boundary nodes and permitted-empty suites keep their own state.
    suite.retain_included_children();
    if had_children {
        if !suite.is_boundary() && !suite.has_included_children() {
            suite.set_included(false);
        }
        if enabled && !suite.has_enabled_children() {
            suite.set_enabled(false);
        }
    }
    Ok(())
}
