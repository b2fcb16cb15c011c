//! Execution context exposed to edge functions.

use std::future::Future;
use std::sync::Arc;

use http::Uri;
use serde::Serialize;
use tracing::{debug, info};

use crate::chain::executor::{relative, Chain};
use crate::error::{EdgeError, Result};
use crate::http::{CookieStore, EdgeRequest, EdgeResponse, RequestMeta};

/// Capabilities a function may use while handling a request.
///
/// A small adapter over the owning chain's state: cookies, request
/// metadata, the `next` continuation into the rest of the chain, an
/// immediate origin `rewrite`, logging and detached background work.
///
/// The context deliberately holds no copy of the request itself; the
/// function owns the live request, so `next` and `rewrite` take it as an
/// argument and observe every mutation made up to the call.
pub struct FunctionContext<'a> {
    chain: &'a Chain,
    index: usize,
    meta: Arc<RequestMeta>,
    client_ip: Option<String>,
}

impl<'a> FunctionContext<'a> {
    pub(crate) fn new(chain: &'a Chain, index: usize, request: &EdgeRequest) -> Self {
        let client_ip = request
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string());
        Self {
            chain,
            index,
            meta: request.meta_arc(),
            client_ip,
        }
    }

    /// Cookie interface; operations are buffered and applied at the end of
    /// the run.
    pub fn cookies(&self) -> &CookieStore {
        self.chain.cookies()
    }

    /// Request id assigned by the calling proxy.
    pub fn request_id(&self) -> &str {
        &self.meta.request_id
    }

    /// Raw geo blob, if the proxy sent one.
    pub fn geo(&self) -> Option<&str> {
        self.meta.geo.as_deref()
    }

    /// Raw site blob, if the proxy sent one.
    pub fn site(&self) -> Option<&str> {
        self.meta.site_info.as_deref()
    }

    /// Raw account blob, if the proxy sent one.
    pub fn account(&self) -> Option<&str> {
        self.meta.account_info.as_deref()
    }

    /// Deploy identifier, if the proxy sent one.
    pub fn deploy(&self) -> Option<&str> {
        self.meta.deploy_id.as_deref()
    }

    /// Raw identity blob, if the proxy sent one.
    pub fn identity(&self) -> Option<&str> {
        self.meta.identity.as_deref()
    }

    /// Client IP as reported by the proxy.
    pub fn ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    /// Run the remainder of the chain with the given request and hand back
    /// its response.
    ///
    /// The caller passes its current request, so header mutations made
    /// before the call are visible to every function, bypass diff and
    /// origin fetch below it. The sub-run always produces a concrete
    /// response; bypass shortcuts are disabled below a `next` boundary.
    pub async fn next(&self, request: EdgeRequest) -> Result<EdgeResponse> {
        let result = self.chain.execute(self.index + 1, request, true).await?;
        Ok(result.into_response())
    }

    /// Fetch a same-origin path from the origin immediately, without
    /// running any other functions. The given request supplies the method,
    /// headers and body of the origin call.
    pub async fn rewrite(&self, request: &EdgeRequest, path: &str) -> Result<EdgeResponse> {
        let target: Uri = path.parse()?;
        if !request.is_same_origin(&target) {
            return Err(EdgeError::user(
                "edge functions can only rewrite to the same host",
            ));
        }
        self.chain.metrics().track_operation("rewrite");

        let request = request.with_uri(relative(&target)?);
        let result = self.chain.passthrough(&request).await?;
        Ok(result.into_response())
    }

    /// Log a message attributed to this request.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        if self.meta.debug_logging {
            info!("[{}] {}", self.request_id(), message);
        } else {
            debug!("[{}] {}", self.request_id(), message);
        }
        self.chain.push_message(message);
    }

    /// Build a JSON response.
    pub fn json<T: Serialize>(&self, value: &T) -> Result<EdgeResponse> {
        EdgeResponse::json(value).map_err(EdgeError::from)
    }

    /// Run detached background work that may outlive the response.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.chain.push_background(tokio::spawn(work));
    }
}
