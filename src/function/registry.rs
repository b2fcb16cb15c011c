//! Registry mapping function names to their implementations.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::{EdgeError, Result};
use crate::function::EdgeFunction;

/// Registered functions, keyed by name.
///
/// Populated once at server startup and shared read-only across requests;
/// the per-request function list arrives from the calling proxy and is
/// resolved against this registry.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn EdgeFunction>>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under a name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        function: Arc<dyn EdgeFunction>,
    ) -> Result<()> {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(EdgeError::Config(format!(
                "function '{}' is already registered",
                name
            )));
        }
        info!("Registered function: {}", name);
        self.functions.insert(name, function);
        Ok(())
    }

    /// Look up a function by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn EdgeFunction>> {
        self.functions.get(name).cloned()
    }

    /// Names of all registered functions.
    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }
}
