//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::ChainOptions;
use crate::router::RouteDecl;

/// Deployment environment, controlling how uncaught errors are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Verbose JSON error bodies for local development.
    #[default]
    Local,
    /// Minimal error bodies; details stay in the logs.
    Production,
}

/// Configuration for the edgechain server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Deployment environment.
    pub environment: Environment,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Per-request execution timeout; `None` disables it.
    pub request_timeout: Option<Duration>,
    /// Embed cookie-derived headers into bypass response bodies.
    pub serialize_response_headers: bool,
    /// Switch function responses to chunked transfer encoding.
    pub force_chunked_encoding: bool,
    /// Route declarations from invocation metadata.
    pub routes: Vec<RouteDecl>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: Environment::default(),
            max_body_size: 10 * 1024 * 1024, // 10MB
            request_timeout: Some(Duration::from_secs(30)),
            serialize_response_headers: false,
            force_chunked_encoding: false,
            routes: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the deployment environment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Add a route declaration.
    pub fn route(mut self, decl: RouteDecl) -> Self {
        self.routes.push(decl);
        self
    }

    /// Enable embedding cookie-derived headers into bypass bodies.
    pub fn serialize_response_headers(mut self, enabled: bool) -> Self {
        self.serialize_response_headers = enabled;
        self
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The chain-level compatibility options derived from this config.
    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            serialize_response_headers: self.serialize_response_headers,
            force_chunked_encoding: self.force_chunked_encoding,
        }
    }
}
