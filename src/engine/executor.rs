//! The execution pass
//!
//! Depth-first walk over the retained tree. Every retained element reports
//! exactly one Starting and one Finished event, including disabled
//! subtrees (report-only) and elements skipped by a fail-fast abort.
//! Ordinary failures are captured at the element boundary; only the
//! distinguished fail-fast failure is re-raised through enclosing layers.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::chain::{compose, ExecContext, ExecResult, InvocationMode, WrapAction, WrappedFn};
use crate::error::{absorb_failures, Failure};
use crate::fixture::{run_teardowns, TestContext};
use crate::report::ElementInfo;
use crate::tree::{Element, Suite, Test};

pub(crate) fn execute(element: Element, ctx: ExecContext) -> BoxFuture<'static, ExecResult> {
    match element {
        Element::Suite(suite) => execute_suite(suite, ctx).boxed(),
        Element::Test(test) => execute_test(test, ctx).boxed(),
    }
}

async fn execute_suite(suite: Arc<Suite>, mut ctx: ExecContext) -> ExecResult {
    if !suite.is_included() {
        return Ok(());
    }

    // report_only applies the suite's report-setup itself.
    if let Some(abort) = ctx.fail_fast.as_ref().and_then(|state| state.tripped()) {
        report_only(&Element::Suite(suite), &ctx, Some(&abort));
        return Ok(());
    }
    if !suite.is_enabled() {
        report_only(&Element::Suite(suite), &ctx, None);
        return Ok(());
    }
    suite.config().apply_report_setup(&mut ctx.reporters);

    let boundary = suite.is_boundary();
    let starting = if boundary {
        None
    } else {
        debug!(path = %suite.path_string(), "suite starting");
        Some(ctx.reporters.starting(suite.info()))
    };

    let primary: WrappedFn = {
        let suite = suite.clone();
        Box::new(move |ctx| run_children(suite, ctx).boxed())
    };
    let wrapped = if boundary {
        // Boundary nodes still run their own wrappers (session-level
        // config) but are never targets of traversals.
        compose(
            suite.config().wrappers().to_vec(),
            suite.config().permits(),
            suite.name().to_string(),
            primary,
        )
    } else {
        let info = suite.info();
        let mut wrappers: Vec<WrapAction> = ctx.traversals.wrappers_for(&info);
        wrappers.extend(suite.config().wrappers().iter().cloned());
        compose(
            wrappers,
            suite.config().permits(),
            info.path.clone(),
            primary,
        )
    };

    let result = wrapped(ctx.clone()).await;

    // Child work is done; close this suite's fixtures in reverse creation
    // order, folding close failures onto the primary outcome.
    let close_failures = run_teardowns(suite.drain_fixture_teardowns()).await;
    let result = absorb_failures(result, close_failures);

    match result {
        Ok(()) => {
            if let Some(starting) = starting {
                ctx.reporters.finished(starting, None);
            }
            Ok(())
        }
        Err(failure) if failure.is_fail_fast() => {
            if let Some(starting) = starting {
                ctx.reporters.finished(starting, Some(failure.clone()));
            }
            Err(failure)
        }
        Err(failure) => {
            warn!(path = %suite.path_string(), %failure, "suite failed");
            if let Some(starting) = starting {
                ctx.reporters.finished(starting, Some(failure));
            }
            Ok(())
        }
    }
}

/// The cumulative child-execution action of a suite.
async fn run_children(suite: Arc<Suite>, ctx: ExecContext) -> ExecResult {
    // The session root always runs its children sequentially, whatever
    // mode the surrounding configuration asked for.
    let mode = if suite.is_session() {
        InvocationMode::Sequential
    } else {
        ctx.mode()
    };
    let children = suite.children_snapshot();
    let mut abort: Option<Failure> = None;

    match mode {
        InvocationMode::Sequential => {
            for child in children {
                if let Err(failure) = execute(child, ctx.clone()).await {
                    // Remember the abort and keep going: remaining
                    // children report it without running.
                    abort.get_or_insert(failure);
                }
            }
        }
        InvocationMode::Concurrent => {
            let mut handles: Vec<(ElementInfo, JoinHandle<ExecResult>)> = Vec::new();
            for child in children {
                let info = child.info();
                let task = tokio::spawn(execute(child, ctx.clone()));
                handles.push((info, task));
            }
            for (info, handle) in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(failure)) => {
                        abort.get_or_insert(failure);
                    }
                    Err(join_error) => {
                        // The child task died outside its own reporting;
                        // synthesize a best-effort Finished pair for it.
                        let failure = if join_error.is_panic() {
                            Failure::panic(format!("child task panicked: {join_error}"))
                        } else {
                            Failure::cancelled(format!("child task cancelled: {join_error}"))
                        };
                        warn!(path = %info.path, %failure, "child task lost");
                        let starting = ctx.reporters.starting(info);
                        ctx.reporters.finished(starting, Some(failure));
                    }
                }
            }
        }
    }

    match abort {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

async fn execute_test(test: Arc<Test>, mut ctx: ExecContext) -> ExecResult {
    if !test.is_included() {
        return Ok(());
    }
    test.config().apply_report_setup(&mut ctx.reporters);
    let info = test.info();

    if let Some(abort) = ctx.fail_fast.as_ref().and_then(|state| state.tripped()) {
        let starting = ctx.reporters.starting(info);
        ctx.reporters.finished(starting, Some(abort));
        return Ok(());
    }

    let starting = ctx.reporters.starting(info.clone());
    if !test.is_enabled() {
        ctx.reporters.finished(starting, None);
        return Ok(());
    }

    debug!(path = %info.path, "test starting");
    let cx = TestContext::new(info.path.clone());

    let primary: WrappedFn = {
        let action = test.take_action();
        let cx = cx.clone();
        let path = info.path.clone();
        Box::new(move |_ctx| {
            async move {
                let Some(action) = action else {
                    return Err(Failure::usage(format!(
                        "action of test `{path}` was already consumed"
                    )));
                };
                match AssertUnwindSafe(async move { action(cx).await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(payload) => Err(Failure::panic(panic_message(payload))),
                }
            }
            .boxed()
        })
    };

    let mut wrappers: Vec<WrapAction> = ctx.traversals.wrappers_for(&info);
    wrappers.extend(test.config().wrappers().iter().cloned());
    let wrapped = compose(
        wrappers,
        test.config().permits(),
        info.path.clone(),
        primary,
    );

    let result = wrapped(ctx.clone()).await;

    // Release this test's fixtures, newest first, before reporting.
    let close_failures = run_teardowns(cx.drain_teardowns()).await;
    let result = absorb_failures(result, close_failures);

    match result {
        Ok(()) => {
            ctx.reporters.finished(starting, None);
            Ok(())
        }
        Err(failure) if failure.is_fail_fast() => {
            // Re-raised through every layer, never captured here.
            ctx.reporters.finished(starting, Some(failure.clone()));
            Err(failure)
        }
        Err(failure) => {
            ctx.reporters.finished(starting, Some(failure.clone()));
            if let Some(state) = &ctx.fail_fast {
                if let Some(abort) = state.record_failure() {
                    return Err(abort);
                }
            }
            Ok(())
        }
    }
}

/// Report a Starting/Finished pair for a subtree that does no real work:
/// disabled elements (no failure) or elements skipped by an abort (which
/// carry the shared abort failure).
fn report_only(element: &Element, ctx: &ExecContext, failure: Option<&Failure>) {
    match element {
        Element::Suite(suite) => {
            if !suite.is_included() {
                return;
            }
            let mut reporters = ctx.reporters.clone();
            suite.config().apply_report_setup(&mut reporters);
            let starting = if suite.is_boundary() {
                None
            } else {
                Some(reporters.starting(suite.info()))
            };
            let child_ctx = ExecContext {
                reporters,
                ..ctx.clone()
            };
            for child in suite.children_snapshot() {
                report_only(&child, &child_ctx, failure);
            }
            if let Some(starting) = starting {
                child_ctx
                    .reporters
                    .finished(starting, failure.cloned());
            }
        }
        Element::Test(test) => {
            if !test.is_included() {
                return;
            }
            let mut reporters = ctx.reporters.clone();
            test.config().apply_report_setup(&mut reporters);
            let starting = reporters.starting(test.info());
            reporters.finished(starting, failure.cloned());
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "test panicked".to_string()
    }
}
