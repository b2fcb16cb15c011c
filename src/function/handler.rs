//! Edge function handler trait.

use async_trait::async_trait;
use http::Uri;

use crate::chain::FunctionContext;
use crate::error::Result;
use crate::http::{EdgeRequest, EdgeResponse};

/// What a function decided to do with the request.
#[derive(Debug)]
pub enum FunctionOutcome {
    /// Return this response up the chain.
    Respond(EdgeResponse),
    /// Change the effective request URL, potentially triggering a
    /// different set of functions.
    Rewrite(Uri),
    /// Pass control to the next function in the chain.
    Skip,
}

/// A user-supplied request handler executed by the chain.
///
/// Functions are stateless per request: the same instance may serve many
/// concurrent requests, each with its own context.
#[async_trait]
pub trait EdgeFunction: Send + Sync {
    /// Handle an incoming request.
    ///
    /// Header mutations made through the mutable request persist for the
    /// rest of the chain. The context exposes cookies, request metadata, a
    /// `next` continuation into the remainder of the chain, an immediate
    /// origin `rewrite` helper, logging and background work; `next` and
    /// `rewrite` take the caller's request so mutations made before the
    /// call are visible below it.
    async fn handle(
        &self,
        request: &mut EdgeRequest,
        ctx: &FunctionContext<'_>,
    ) -> Result<FunctionOutcome>;
}
