//! Configuration
//!
//! The composable `TestConfig` algebra plus the runner input surface
//! (arguments, environment variables, profile file).

mod args;
pub(crate) mod chain;
mod env;
mod profile;
mod traversal;

pub use args::{RunnerArgs, RunnerOptions};
pub use chain::{
    ExecContext, ExecResult, Invocation, InvocationMode, Permits, SetupView, TestConfig,
};
pub use env::{EnvBuilder, EnvConfig, EnvGuard};
pub use profile::{ProfileFile, RunProfile};
pub use traversal::Traversal;
