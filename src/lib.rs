//! Canopy - Hierarchical Async Test-Execution Engine
//!
//! Organizes tests into a tree of suites and runs them under composable
//! configuration, with scoped lazily-initialized fixtures, pattern-based
//! selection, and structured lifecycle events streamed to pluggable
//! report sinks.
//!
//! ## Features
//!
//! - Suite/test tree with parent-scoped unique names and stable paths
//! - Composable configuration: disable, invocation mode, timeouts,
//!   custom wrappers, subtree traversals, layered report sinks
//! - Sequential or concurrent child execution with strict ordering
//!   guarantees under sequential invocation
//! - Suite- and test-scoped fixtures with guaranteed reverse-order teardown
//! - Include/exclude selection with early subtree pruning
//! - Fail-fast abort after a configured failure threshold
//!
//! ## Usage
//!
//! ```no_run
//! use canopy::{RunContext, Session, SessionOptions, TracingSink};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), canopy::FrameworkError> {
//! let ctx = RunContext::new();
//! let session = Session::new(
//!     &ctx,
//!     SessionOptions::new().with_reporter(TracingSink::new()),
//! )?;
//!
//! session.suite("arithmetic", |s| {
//!     s.test("adds", |_cx| async {
//!         assert_eq!(2 + 2, 4);
//!         Ok(())
//!     });
//!     s.suite("nested", |s| {
//!         s.test("still_adds", |_cx| async { Ok(()) });
//!     });
//! })?;
//!
//! let outcome = session.execute().await?;
//! assert!(!outcome.is_aborted());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod fixture;
pub mod report;
pub mod select;
pub mod tree;
pub mod util;

pub use config::{
    ExecResult, Invocation, InvocationMode, RunnerArgs, RunnerOptions, TestConfig, Traversal,
};
pub use engine::{Compartment, FailFastState, RunContext, RunOutcome, Session, SessionOptions};
pub use error::{Failure, FailureKind, FrameworkError};
pub use fixture::{FixtureHandle, TestContext};
pub use report::{
    CollectingSink, ElementInfo, ElementKind, ReportSink, RunSummary, SummarySink, TestEvent,
    TracingSink,
};
pub use select::{Pattern, Selection};
pub use tree::{Suite, SuiteScope, Test};
pub use util::{init_logger, LogLevel};
