//! # Edgechain - per-request execution engine for edge functions
//!
//! Edgechain runs an ordered list of user-supplied handlers for each
//! inbound HTTP request, mediates calls back to the origin server, and
//! negotiates a protocol shortcut ("bypass") with the calling proxy that
//! lets the proxy finish a request without an unnecessary origin
//! round-trip through the engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Calling Proxy                               │
//! │        (routing, caching, TLS, bypass-capable fast path)            │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │  x-edge-* negotiation headers
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Edgechain Engine                             │
//! │   ┌───────────┐   ┌───────────┐   ┌───────────┐                    │
//! │   │ Function  │ → │ Function  │ → │ Function  │ → end of chain     │
//! │   │   (A)     │   │   (B)     │   │   (C)     │    │               │
//! │   └───────────┘   └───────────┘   └───────────┘    │               │
//! │        │ rewrite spawns a child chain              ▼               │
//! │        └──────────────────────────────►  bypass  or  origin fetch  │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//!                             Origin Server
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use edgechain::prelude::*;
//! use std::sync::Arc;
//!
//! struct HelloFunction;
//!
//! #[async_trait::async_trait]
//! impl EdgeFunction for HelloFunction {
//!     async fn handle(
//!         &self,
//!         _request: &mut EdgeRequest,
//!         _ctx: &FunctionContext<'_>,
//!     ) -> edgechain::Result<FunctionOutcome> {
//!         Ok(FunctionOutcome::Respond(EdgeResponse::text("Hello from the edge!")))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = RuntimeConfig::new()
//!         .route(RouteDecl::new("hello", "^/hello$"));
//!
//!     let mut server = EdgeServer::new(config);
//!     server.register_function("hello", Arc::new(HelloFunction))?;
//!     server.run().await
//! }
//! ```
//!
//! ## Execution model
//!
//! Functions run strictly sequentially. Each one may respond, skip to the
//! next function, or rewrite the request to a different same-origin path;
//! a rewrite that matches other functions spawns a child chain sharing
//! cookies, metrics and cancellation with its parent. When no function
//! produced a response, the engine either answers with a bypass response
//! (if the proxy advertised support and the request is eligible) or
//! fetches the origin with bounded retry.

pub mod chain;
pub mod error;
pub mod function;
pub mod http;
pub mod origin;
pub mod router;
pub mod runtime;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::chain::{Chain, ChainOptions, FunctionContext, MetricsAccumulator};
    pub use crate::error::EdgeError;
    pub use crate::function::{EdgeFunction, FunctionOutcome};
    pub use crate::http::{ChainResponse, CookieStore, EdgeRequest, EdgeResponse};
    pub use crate::origin::OriginClient;
    pub use crate::router::{OnError, RouteDecl, Router};
    pub use crate::runtime::{EdgeServer, Environment, RuntimeConfig};
    pub use async_trait::async_trait;
}

// Re-export for convenience
pub use chain::{Chain, FunctionContext};
pub use error::{EdgeError, Result};
pub use function::{EdgeFunction, FunctionOutcome};
pub use http::{EdgeRequest, EdgeResponse};
pub use runtime::{EdgeServer, RuntimeConfig};
