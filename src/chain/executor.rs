//! The chain execution state machine.
//!
//! One `Chain` exists per logical execution. A rewrite that matches new
//! functions spawns a child chain sharing cookies, cancellation, metrics
//! and the rewrite history, forming a tree rooted at the request's
//! original chain. Shared resources are passed at construction; children
//! hold no back-references to their parent.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use http::{HeaderMap, Uri};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::chain::context::FunctionContext;
use crate::chain::{bypass, MetricsAccumulator};
use crate::error::{EdgeError, Result};
use crate::function::FunctionOutcome;
use crate::http::{headers, CacheMode, ChainResponse, CookieStore, EdgeRequest};
use crate::origin::{self, OriginClient};
use crate::router::{OnError, Router};
use crate::runtime::{Cancellation, ChainHandle};

/// Compatibility switches affecting how responses are shaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainOptions {
    /// Embed cookie-derived headers into bypass response bodies.
    pub serialize_response_headers: bool,
    /// Switch function responses to chunked transfer encoding.
    pub force_chunked_encoding: bool,
}

/// Ordered execution of edge functions for a single logical request.
pub struct Chain {
    functions: Vec<String>,
    router: Arc<Router>,
    origin: Arc<dyn OriginClient>,
    cookies: Arc<CookieStore>,
    metrics: Arc<MetricsAccumulator>,
    cancellation: Cancellation,
    history: Arc<Mutex<HashSet<String>>>,
    messages: Arc<Mutex<Vec<String>>>,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
    initial_headers: Arc<HeaderMap>,
    initial_url: Arc<String>,
    options: ChainOptions,
}

impl Chain {
    /// Construct the root chain for an inbound request.
    ///
    /// The function list comes from the request's negotiation metadata; the
    /// initial pathname seeds the rewrite history so a later rewrite back
    /// into it is caught as a loop.
    pub fn new(
        request: &EdgeRequest,
        router: Arc<Router>,
        origin: Arc<dyn OriginClient>,
        cancellation: Cancellation,
        options: ChainOptions,
    ) -> Self {
        let mut history = HashSet::new();
        history.insert(request.path().to_string());

        Self {
            functions: request.meta().function_names.clone(),
            router,
            origin,
            cookies: Arc::new(CookieStore::new()),
            metrics: Arc::new(MetricsAccumulator::default()),
            cancellation,
            history: Arc::new(Mutex::new(history)),
            messages: Arc::new(Mutex::new(Vec::new())),
            background: Arc::new(Mutex::new(Vec::new())),
            initial_headers: Arc::new(request.headers.clone()),
            initial_url: Arc::new(request.effective_url()),
            options,
        }
    }

    /// Construct a child chain for a rewrite, sharing this chain's
    /// resources but running its own function list from index zero.
    fn child(&self, functions: Vec<String>) -> Self {
        Self {
            functions,
            router: Arc::clone(&self.router),
            origin: Arc::clone(&self.origin),
            cookies: Arc::clone(&self.cookies),
            metrics: Arc::clone(&self.metrics),
            cancellation: self.cancellation.clone(),
            history: Arc::clone(&self.history),
            messages: Arc::clone(&self.messages),
            background: Arc::clone(&self.background),
            initial_headers: Arc::clone(&self.initial_headers),
            initial_url: Arc::clone(&self.initial_url),
            options: self.options,
        }
    }

    /// Run the chain to completion for the given request.
    pub async fn run(&self, request: EdgeRequest) -> Result<ChainResponse> {
        self.execute(0, request, false).await
    }

    /// The chain's buffered cookie store.
    pub fn cookies(&self) -> &CookieStore {
        &self.cookies
    }

    /// The chain's metrics accumulator.
    pub fn metrics(&self) -> &MetricsAccumulator {
        &self.metrics
    }

    /// Shared handles for the request tracker.
    pub fn handle(&self) -> ChainHandle {
        ChainHandle {
            cancellation: self.cancellation.clone(),
            messages: Arc::clone(&self.messages),
        }
    }

    /// Take ownership of any background work spawned via `wait_until`.
    pub fn take_background(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.background.lock().expect("background lock"))
    }

    pub(crate) fn push_message(&self, message: String) {
        self.messages.lock().expect("messages lock").push(message);
    }

    pub(crate) fn push_background(&self, handle: JoinHandle<()>) {
        self.background
            .lock()
            .expect("background lock")
            .push(handle);
    }

    /// Advance the state machine at `(self, index)`.
    ///
    /// `require_final` is forced by an ancestor `next()` call and disables
    /// every bypass shortcut below it.
    pub(crate) fn execute<'a>(
        &'a self,
        index: usize,
        request: EdgeRequest,
        require_final: bool,
    ) -> Pin<Box<dyn Future<Output = Result<ChainResponse>> + Send + 'a>> {
        Box::pin(async move {
            if self.cancellation.is_cancelled() {
                return Err(EdgeError::Cancelled);
            }

            let mut request = request;
            let Some(name) = self.functions.get(index) else {
                return self.end_of_chain(request, require_final).await;
            };

            let function = self
                .router
                .get_function(name)
                .ok_or_else(|| EdgeError::user(format!("no function named '{}' is deployed", name)))?;

            self.metrics.record_invocation();
            debug!("Invoking edge function '{}' at index {}", name, index);

            let ctx = FunctionContext::new(self, index, &request);
            match function.handle(&mut request, &ctx).await {
                Ok(FunctionOutcome::Respond(mut response)) => {
                    response.normalize(self.options.force_chunked_encoding);
                    Ok(ChainResponse::Plain(response))
                }
                Ok(FunctionOutcome::Skip) => self.execute(index + 1, request, require_final).await,
                Ok(FunctionOutcome::Rewrite(target)) => {
                    self.rewrite(request, target, require_final).await
                }
                Err(err) => self.recover(index, name, request, err, require_final).await,
            }
        })
    }

    /// No function left to run: bypass if the proxy can finish the request
    /// itself, otherwise contact the origin.
    async fn end_of_chain(
        &self,
        request: EdgeRequest,
        require_final: bool,
    ) -> Result<ChainResponse> {
        let meta = request.meta();
        let headers_unchanged = headers::diff(&self.initial_headers, &request.headers).is_empty();
        let eligible = !require_final
            && request.body.is_empty()
            && meta.cache_mode == CacheMode::Off
            && meta.bypass.passthrough
            && (headers_unchanged || meta.bypass.rewrite);

        if eligible {
            debug!("End of chain: answering with a bypass response");
            return self.bypass_response(&request);
        }
        self.passthrough(&request).await
    }

    /// Handle a rewrite target returned by a function.
    async fn rewrite(
        &self,
        request: EdgeRequest,
        target: Uri,
        require_final: bool,
    ) -> Result<ChainResponse> {
        if !request.is_same_origin(&target) {
            return Err(EdgeError::user(
                "edge functions can only rewrite to the same host",
            ));
        }
        self.metrics.track_operation("rewrite");

        let path = target.path().to_string();
        {
            let mut history = self.history.lock().expect("rewrite history lock");
            if history.contains(&path) {
                return Err(EdgeError::user(format!(
                    "loop detected: '{}' has already been visited for this request",
                    path
                )));
            }
            history.insert(path.clone());
        }

        let request = request.with_uri(relative(&target)?);
        let matched = self.router.matches(&path);

        if matched.is_empty() {
            if request.meta().bypass.rewrite && !require_final {
                debug!("Rewrite to '{}' matched no functions: bypassing", path);
                return self.bypass_response(&request);
            }
            return self.passthrough(&request).await;
        }

        debug!("Rewrite to '{}' runs functions: {:?}", path, matched);
        let require_final = require_final || !request.meta().bypass.rewrite;
        let child = self.child(matched);
        child.execute(0, request, require_final).await
    }

    /// Apply the function's on-error mode to a thrown error.
    async fn recover(
        &self,
        index: usize,
        name: &str,
        request: EdgeRequest,
        err: EdgeError,
        require_final: bool,
    ) -> Result<ChainResponse> {
        // Logged exactly once, at the point the error is first observed;
        // recovery paths below must not log it again.
        error!("Edge function '{}' failed: {}", name, err);

        match self.router.on_error(name) {
            OnError::Fail => Err(EdgeError::function(name, err.to_string())),
            OnError::Bypass => {
                debug!("Continuing past '{}' per its on-error mode", name);
                self.execute(index + 1, request, require_final).await
            }
            OnError::Redirect(path) => {
                if require_final {
                    // An ancestor next() call must decide what to do.
                    return Err(EdgeError::function(name, err.to_string()));
                }
                let target: Uri = path.parse()?;
                let request = request.with_uri(relative(&target)?);
                if request.meta().bypass.rewrite {
                    self.bypass_response(&request)
                } else {
                    self.passthrough(&request).await
                }
            }
        }
    }

    /// Build the protocol-shortcut response for the current request state.
    fn bypass_response(&self, request: &EdgeRequest) -> Result<ChainResponse> {
        let diff = headers::diff(&self.initial_headers, &request.headers);
        let cookie_headers = if self.options.serialize_response_headers && !self.cookies.is_empty()
        {
            Some(self.cookies.serialized_headers()?)
        } else {
            None
        };
        let response = bypass::build(
            &self.initial_url,
            &request.effective_url(),
            diff,
            cookie_headers.as_ref(),
        )?;
        Ok(ChainResponse::Bypass(response))
    }

    /// Issue the retrying origin fetch for a request.
    pub(crate) async fn passthrough(&self, request: &EdgeRequest) -> Result<ChainResponse> {
        origin::passthrough(
            self.origin.as_ref(),
            request,
            &self.cancellation,
            &self.metrics,
        )
        .await
    }
}

/// Reduce a rewrite target to its path-and-query form, the shape requests
/// carry between the proxy and the engine.
pub(crate) fn relative(target: &Uri) -> Result<Uri> {
    match target.path_and_query() {
        Some(pq) => Ok(pq.as_str().parse()?),
        None => Ok(Uri::from_static("/")),
    }
}
