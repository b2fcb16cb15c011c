//! Edgechain - example engine bootstrap
//!
//! Runs the engine with a few sample edge functions wired to routes.

use std::sync::Arc;

use edgechain::prelude::*;
use tracing_subscriber::EnvFilter;

/// Greets the caller and sets a session cookie.
struct HelloFunction;

#[async_trait]
impl EdgeFunction for HelloFunction {
    async fn handle(
        &self,
        request: &mut EdgeRequest,
        ctx: &FunctionContext<'_>,
    ) -> edgechain::Result<FunctionOutcome> {
        ctx.cookies().set(cookie::Cookie::new("greeted", "1"))?;

        let body = serde_json::json!({
            "message": "Hello from the edge!",
            "path": request.path(),
            "request_id": ctx.request_id(),
        });
        Ok(FunctionOutcome::Respond(ctx.json(&body)?))
    }
}

/// Stamps the caller's country onto the request and lets it continue.
struct CountryHeaderFunction;

#[async_trait]
impl EdgeFunction for CountryHeaderFunction {
    async fn handle(
        &self,
        request: &mut EdgeRequest,
        ctx: &FunctionContext<'_>,
    ) -> edgechain::Result<FunctionOutcome> {
        if let Some(geo) = ctx.geo() {
            if let Ok(value) = http::HeaderValue::from_str(geo) {
                request.headers.insert("x-visitor-geo", value);
            }
        }
        ctx.log("stamped visitor geo");
        Ok(FunctionOutcome::Skip)
    }
}

/// Sends requests for the legacy path to its replacement.
struct LegacyRedirectFunction;

#[async_trait]
impl EdgeFunction for LegacyRedirectFunction {
    async fn handle(
        &self,
        _request: &mut EdgeRequest,
        _ctx: &FunctionContext<'_>,
    ) -> edgechain::Result<FunctionOutcome> {
        Ok(FunctionOutcome::Rewrite("/hello".parse()?))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting edgechain server...");

    let config = RuntimeConfig::new()
        .host("0.0.0.0")
        .port(8080)
        .environment(Environment::Local)
        .route(RouteDecl::new("country", "^/.*$").exclude("^/assets(/.*)?$"))
        .route(RouteDecl::new("hello", "^/hello$"))
        .route(RouteDecl::new("legacy", "^/legacy(/.*)?$").on_error("bypass"));

    let mut server = EdgeServer::new(config);
    server.register_function("hello", Arc::new(HelloFunction))?;
    server.register_function("country", Arc::new(CountryHeaderFunction))?;
    server.register_function("legacy", Arc::new(LegacyRedirectFunction))?;

    tracing::info!("Registered functions: hello, country, legacy");
    tracing::info!(
        "Try: curl -H 'x-edge-request-id: dev-1' -H 'x-edge-functions: hello' http://localhost:8080/hello"
    );

    server.run().await
}
