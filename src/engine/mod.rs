//! The execution engine
//!
//! Setup pass, depth-first executor, fail-fast accounting, and the
//! session entry points.

mod executor;
mod failfast;
mod session;
mod setup;

pub use failfast::FailFastState;
pub use session::{Compartment, RunContext, RunOutcome, Session, SessionOptions};
