//! The element tree
//!
//! Node types and the registration-scope discipline for building them.

mod element;
mod scope;

pub use element::{Element, Suite, SuiteKind, Test, PATH_SEPARATOR};
pub use scope::SuiteScope;

pub(crate) use scope::SetupState;
