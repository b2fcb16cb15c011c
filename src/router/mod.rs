//! Route table mapping URL paths to edge functions.
//!
//! Built once per deploy from invocation metadata; immutable after
//! construction and safe to share read-only across a request's entire
//! chain tree.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EdgeError, Result};
use crate::function::{EdgeFunction, FunctionRegistry};

/// Per-function policy for handling a thrown error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OnError {
    /// Log and rethrow; the caller surfaces a 500.
    #[default]
    Fail,
    /// Log and continue with the next function in the chain.
    Bypass,
    /// Serve the given path instead.
    Redirect(String),
}

impl OnError {
    /// Parse an on-error mode from its declaration form:
    /// `"fail"`, `"bypass"`, or an absolute path.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "fail" => Ok(OnError::Fail),
            "bypass" => Ok(OnError::Bypass),
            path if path.starts_with('/') => Ok(OnError::Redirect(path.to_string())),
            other => Err(EdgeError::Config(format!(
                "unknown on_error mode '{}': expected 'fail', 'bypass' or an absolute path",
                other
            ))),
        }
    }
}

/// Route declaration as it arrives in invocation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecl {
    /// Name of the function to run.
    pub function: String,
    /// Regular expression matched against the URL path.
    pub pattern: String,
    /// Patterns that exclude otherwise-matching paths.
    #[serde(default)]
    pub excluded_patterns: Vec<String>,
    /// On-error mode; defaults to `fail`.
    #[serde(default)]
    pub on_error: Option<String>,
}

impl RouteDecl {
    /// Declare a route for a function.
    pub fn new(function: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            pattern: pattern.into(),
            excluded_patterns: Vec::new(),
            on_error: None,
        }
    }

    /// Add an exclusion pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excluded_patterns.push(pattern.into());
        self
    }

    /// Set the on-error mode.
    pub fn on_error(mut self, mode: impl Into<String>) -> Self {
        self.on_error = Some(mode.into());
        self
    }
}

struct CompiledRoute {
    function: String,
    pattern: Regex,
    excluded: Vec<Regex>,
}

impl CompiledRoute {
    fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path) && !self.excluded.iter().any(|p| p.is_match(path))
    }
}

/// Compiled route table plus per-function error-handling modes.
pub struct Router {
    routes: Vec<CompiledRoute>,
    on_error: HashMap<String, OnError>,
    registry: Arc<FunctionRegistry>,
}

impl Router {
    /// Compile route declarations against a function registry.
    pub fn new(decls: &[RouteDecl], registry: Arc<FunctionRegistry>) -> Result<Self> {
        let mut routes = Vec::with_capacity(decls.len());
        let mut on_error = HashMap::new();

        for decl in decls {
            let pattern = Regex::new(&decl.pattern).map_err(|e| {
                EdgeError::Config(format!("invalid pattern '{}': {}", decl.pattern, e))
            })?;
            let excluded = decl
                .excluded_patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        EdgeError::Config(format!("invalid excluded pattern '{}': {}", p, e))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            if let Some(mode) = &decl.on_error {
                on_error
                    .entry(decl.function.clone())
                    .or_insert(OnError::parse(mode)?);
            }

            routes.push(CompiledRoute {
                function: decl.function.clone(),
                pattern,
                excluded,
            });
        }

        Ok(Self {
            routes,
            on_error,
            registry,
        })
    }

    /// Names of the functions configured for a path, in declaration order.
    ///
    /// A route whose exclusion pattern matches the path is never returned,
    /// even when its inclusion pattern also matches.
    pub fn matches(&self, path: &str) -> Vec<String> {
        self.routes
            .iter()
            .filter(|route| route.matches(path))
            .map(|route| route.function.clone())
            .collect()
    }

    /// Look up a function implementation by name.
    pub fn get_function(&self, name: &str) -> Option<Arc<dyn EdgeFunction>> {
        self.registry.get(name)
    }

    /// The function's error-handling mode; `fail` when unconfigured.
    pub fn on_error(&self, name: &str) -> OnError {
        self.on_error.get(name).cloned().unwrap_or_default()
    }
}
