//! Edgechain HTTP server and top-level request handler.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::chain::Chain;
use crate::error::{EdgeError, Result};
use crate::function::{EdgeFunction, FunctionRegistry};
use crate::http::{headers, EdgeRequest, EdgeResponse};
use crate::origin::{HttpOriginClient, OriginClient};
use crate::router::Router;
use crate::runtime::{Cancellation, Environment, RequestTracker, RuntimeConfig};

/// The edgechain server.
///
/// Owns the function registry and, once running, dispatches every inbound
/// request through a freshly constructed chain.
pub struct EdgeServer {
    config: RuntimeConfig,
    registry: FunctionRegistry,
    origin: Arc<dyn OriginClient>,
}

struct ServerState {
    config: RuntimeConfig,
    router: Arc<Router>,
    origin: Arc<dyn OriginClient>,
    tracker: Arc<RequestTracker>,
}

impl EdgeServer {
    /// Create a server with the given configuration and the default
    /// hyper-backed origin client.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_origin(config, Arc::new(HttpOriginClient::new()))
    }

    /// Create a server with a custom origin client.
    pub fn with_origin(config: RuntimeConfig, origin: Arc<dyn OriginClient>) -> Self {
        Self {
            config,
            registry: FunctionRegistry::new(),
            origin,
        }
    }

    /// Register a function with the server.
    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        function: Arc<dyn EdgeFunction>,
    ) -> Result<()> {
        self.registry.register(name, function)
    }

    /// Start the HTTP server.
    pub async fn run(self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.bind_addr().parse()?;
        let listener = TcpListener::bind(addr).await?;

        let router = Arc::new(Router::new(&self.config.routes, Arc::new(self.registry))?);
        let state = Arc::new(ServerState {
            config: self.config,
            router,
            origin: self.origin,
            tracker: Arc::new(RequestTracker::new()),
        });

        info!("Edgechain server listening on {}", addr);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let state = Arc::clone(&state);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, state, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

/// Handle one inbound request.
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
    remote_addr: SocketAddr,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let request = match convert_request(req, &state.config).await {
        Ok(request) => request,
        Err(err) => {
            warn!("Rejecting request from {}: {}", remote_addr, err);
            return Ok(build_response(EdgeResponse::error(
                StatusCode::BAD_REQUEST,
                err.to_string(),
            )));
        }
    };

    let request_id = request.meta().request_id.clone();
    debug!(
        "Handling request: {} {} from {} [{}]",
        request.method,
        request.path(),
        remote_addr,
        request_id
    );

    let cancellation = Cancellation::new();
    let chain = Chain::new(
        &request,
        Arc::clone(&state.router),
        Arc::clone(&state.origin),
        cancellation.clone(),
        state.config.chain_options(),
    );

    // Entry removed by the guard on every exit path.
    let _guard = state.tracker.track(&request_id, chain.handle());

    let produced = Arc::new(AtomicBool::new(false));
    if let Some(timeout) = state.config.request_timeout {
        let cancellation = cancellation.clone();
        let produced = Arc::clone(&produced);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !produced.load(Ordering::SeqCst) {
                debug!("Request timeout elapsed; cancelling execution");
                cancellation.cancel();
            }
        });
    }

    let result = chain.run(request).await;
    produced.store(true, Ordering::SeqCst);

    let response = match result {
        Ok(chain_response) => {
            let is_bypass = chain_response.is_bypass();
            let mut response = chain_response.into_response();
            // Cookies ride inside a bypass body; applying them to headers
            // as well would emit them twice.
            if !is_bypass {
                if let Err(err) = chain.cookies().apply(&mut response.headers) {
                    error!("Failed to apply cookies [{}]: {}", request_id, err);
                    return Ok(build_response(uncaught_error_response(
                        &err,
                        &request_id,
                        state.config.environment,
                    )));
                }
            }
            response
        }
        Err(err) => {
            error!("Uncaught chain error [{}]: {}", request_id, err);
            uncaught_error_response(&err, &request_id, state.config.environment)
        }
    };

    reap_background(&chain, &request_id);
    Ok(build_response(response))
}

/// Await detached `wait_until` work off the request path.
fn reap_background(chain: &Chain, request_id: &str) {
    let handles = chain.take_background();
    if handles.is_empty() {
        return;
    }
    let request_id = request_id.to_string();
    tokio::spawn(async move {
        for handle in handles {
            if let Err(err) = handle.await {
                warn!("Background task failed [{}]: {}", request_id, err);
            }
        }
    });
}

/// Convert a hyper request into an [`EdgeRequest`], enforcing the body
/// size limit and the required negotiation headers.
async fn convert_request(req: Request<Incoming>, config: &RuntimeConfig) -> Result<EdgeRequest> {
    let (parts, body) = req.into_parts();

    let body = body
        .collect()
        .await
        .map_err(|e| {
            if e.is_incomplete_message() || e.is_canceled() {
                EdgeError::ClientAborted
            } else {
                EdgeError::Http(format!("failed to read request body: {}", e))
            }
        })?
        .to_bytes();

    if body.len() > config.max_body_size {
        return Err(EdgeError::Http("request body too large".into()));
    }

    EdgeRequest::from_parts(parts.method, parts.uri, parts.headers, body)
}

/// Render an unrecovered error as a 500 carrying the uncaught marker.
///
/// Local deployments get a verbose JSON body; production withholds the
/// cause beyond a generic message.
fn uncaught_error_response(
    err: &EdgeError,
    request_id: &str,
    environment: Environment,
) -> EdgeResponse {
    let mut response = match environment {
        Environment::Local => {
            let body = serde_json::json!({
                "error": err.to_string(),
                "request_id": request_id,
            });
            EdgeResponse::json(&body).unwrap_or_else(|_| EdgeResponse::text("internal error"))
        }
        Environment::Production => EdgeResponse::text("An internal error occurred"),
    };
    response.status = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers.insert(
        headers::UNCAUGHT_ERROR,
        http::HeaderValue::from_static("1"),
    );
    response
}

/// Build a hyper response from an [`EdgeResponse`].
fn build_response(response: EdgeResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncaught_error_body_depends_on_environment() {
        let err = EdgeError::user("boom");

        let local = uncaught_error_response(&err, "req-1", Environment::Local);
        assert_eq!(local.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(local.headers.get(headers::UNCAUGHT_ERROR).unwrap(), "1");
        assert!(local.text_body().contains("boom"));
        assert!(local.text_body().contains("req-1"));

        let production = uncaught_error_response(&err, "req-1", Environment::Production);
        assert_eq!(production.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!production.text_body().contains("boom"));
    }
}
