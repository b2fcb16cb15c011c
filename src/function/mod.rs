//! Edge function trait and registry.

mod handler;
mod registry;

pub use handler::{EdgeFunction, FunctionOutcome};
pub use registry::FunctionRegistry;
