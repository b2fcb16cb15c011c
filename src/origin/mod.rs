//! Retrying origin fetch.
//!
//! Wraps the outbound call to the origin in bounded exponential-backoff
//! retry, with fast paths for conditions where retrying is pointless or
//! unsafe, and decorates successful responses before handing them back to
//! the chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::chain::MetricsAccumulator;
use crate::error::{EdgeError, Result};
use crate::http::{headers, ChainResponse, EdgeRequest, EdgeResponse};
use crate::runtime::Cancellation;

/// Total attempts, including the first.
pub const MAX_ATTEMPTS: u32 = 3;
/// Delay before the first retry.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
/// Backoff ceiling.
pub const BACKOFF_CAP: Duration = Duration::from_millis(1000);

/// Status returned when the client went away mid-passthrough.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Seam for issuing the outbound origin call.
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// Send the request to the origin and buffer the response.
    async fn fetch(&self, request: &EdgeRequest) -> Result<EdgeResponse>;
}

/// Run an operation with bounded exponential backoff.
///
/// The callback receives the zero-based attempt index. Non-retriable
/// errors exit immediately after a single invocation; after `max_attempts`
/// retriable failures the last observed error is rethrown unchanged.
pub async fn backoff_retry<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = INITIAL_BACKOFF;
    let mut last_error = EdgeError::Passthrough {
        message: "origin fetch was never attempted".into(),
        source: None,
    };

    for attempt in 0..max_attempts {
        if attempt > 0 {
            sleep(delay).await;
            delay = (delay * 2).min(BACKOFF_CAP);
        }
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retriable() => return Err(err),
            Err(err) => {
                debug!(
                    "Retriable origin failure on attempt {}: {}",
                    attempt + 1,
                    err
                );
                last_error = err;
            }
        }
    }

    Err(last_error)
}

enum FetchOutcome {
    Response(EdgeResponse),
    ClientGone,
}

/// Issue the origin call on behalf of the request, with retry, fast paths
/// and cancellation.
pub async fn passthrough(
    client: &dyn OriginClient,
    request: &EdgeRequest,
    cancellation: &Cancellation,
    metrics: &MetricsAccumulator,
) -> Result<ChainResponse> {
    let retries = AtomicU64::new(0);
    let started = Instant::now();

    let outcome = backoff_retry(MAX_ATTEMPTS, |attempt| {
        retries.store(attempt as u64, Ordering::SeqCst);
        async {
            if cancellation.is_cancelled() {
                return Err(EdgeError::Cancelled);
            }
            let fetched = tokio::select! {
                result = client.fetch(request) => result,
                _ = cancellation.cancelled() => Err(EdgeError::Cancelled),
            };
            match fetched {
                Ok(response) => Ok(FetchOutcome::Response(response)),
                // The caller is gone: answer 499 without retrying and
                // without surfacing an error.
                Err(EdgeError::ClientAborted) => Ok(FetchOutcome::ClientGone),
                Err(err @ EdgeError::BodyConsumed) => Err(EdgeError::unretriable(err)),
                Err(err) => Err(err),
            }
        }
    })
    .await;

    let retries = retries.load(Ordering::SeqCst);
    metrics.record_origin_fetch(started.elapsed(), retries);

    match outcome {
        Ok(FetchOutcome::Response(response)) => {
            if retries > 0 {
                debug!("Origin fetch succeeded after {} retries", retries);
            }
            let (response, forwarded) = decorate(response);
            Ok(ChainResponse::Origin {
                response,
                forwarded,
            })
        }
        Ok(FetchOutcome::ClientGone) => Ok(ChainResponse::Plain(EdgeResponse::new(
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        ))),
        Err(err @ EdgeError::Cancelled) => Err(err),
        Err(EdgeError::Unretriable { source }) => Err(*source),
        Err(err) => Err(EdgeError::Passthrough {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }),
    }
}

/// Strip origin-internal headers from a response, moving the known
/// side-channel subset out for later propagation to the final response.
fn decorate(mut response: EdgeResponse) -> (EdgeResponse, HeaderMap) {
    let mut forwarded = HeaderMap::new();
    for name in headers::SIDE_CHANNEL_HEADERS {
        let name = HeaderName::from_static(name);
        if let Some(value) = response.headers.remove(&name) {
            forwarded.insert(name, value);
        }
    }

    for name in headers::LOOP_DETECTION_HEADERS {
        response.headers.remove(name);
    }

    let internal: Vec<HeaderName> = response
        .headers
        .keys()
        .filter(|name| name.as_str().starts_with("x-edge-"))
        .cloned()
        .collect();
    for name in internal {
        response.headers.remove(name);
    }

    (response, forwarded)
}

/// Hyper-backed origin client used in production.
#[derive(Debug, Clone)]
pub struct HttpOriginClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl Default for HttpOriginClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpOriginClient {
    /// Create a client with default connection pooling.
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

#[async_trait]
impl OriginClient for HttpOriginClient {
    async fn fetch(&self, request: &EdgeRequest) -> Result<EdgeResponse> {
        let uri: Uri = request
            .effective_url()
            .parse()
            .map_err(|e| EdgeError::Http(format!("invalid origin URL: {}", e)))?;

        let mut outbound = http::Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .body(Full::new(request.body.clone()))?;
        *outbound.headers_mut() = request.headers.clone();

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(classify_client_error)?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| EdgeError::Http(format!("origin body read failed: {}", e)))?
            .to_bytes();

        Ok(EdgeResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

fn classify_client_error(err: hyper_util::client::legacy::Error) -> EdgeError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if hyper_err.is_canceled() || hyper_err.is_incomplete_message() {
                return EdgeError::ClientAborted;
            }
        }
        source = std::error::Error::source(cause);
    }
    EdgeError::Http(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;
    use http::Method;
    use std::sync::Mutex;

    struct ScriptedOrigin {
        results: Mutex<Vec<Result<EdgeResponse>>>,
        calls: AtomicU64,
    }

    impl ScriptedOrigin {
        fn new(results: Vec<Result<EdgeResponse>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: AtomicU64::new(0),
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OriginClient for ScriptedOrigin {
        async fn fetch(&self, _request: &EdgeRequest) -> Result<EdgeResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.lock().unwrap().remove(0)
        }
    }

    fn request() -> EdgeRequest {
        let mut headers = HeaderMap::new();
        headers.insert(headers::REQUEST_ID, HeaderValue::from_static("req-1"));
        headers.insert(headers::FUNCTIONS, HeaderValue::from_static("a"));
        EdgeRequest::from_parts(Method::GET, "/a".parse().unwrap(), headers, Bytes::new())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let origin = ScriptedOrigin::new(vec![
            Err(EdgeError::Http("connection reset".into())),
            Err(EdgeError::Http("connection reset".into())),
            Ok(EdgeResponse::text("ok")),
        ]);
        let metrics = MetricsAccumulator::default();

        let result = passthrough(&origin, &request(), &Cancellation::new(), &metrics)
            .await
            .unwrap();

        assert_eq!(origin.calls(), 3);
        assert_eq!(metrics.origin_fetch_retries(), 2);
        assert_eq!(result.into_response().text_body(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_wraps_the_last_error() {
        let origin = ScriptedOrigin::new(vec![
            Err(EdgeError::Http("reset 1".into())),
            Err(EdgeError::Http("reset 2".into())),
            Err(EdgeError::Http("reset 3".into())),
        ]);
        let metrics = MetricsAccumulator::default();

        let err = passthrough(&origin, &request(), &Cancellation::new(), &metrics)
            .await
            .unwrap_err();

        assert_eq!(origin.calls(), 3);
        assert!(matches!(err, EdgeError::Passthrough { .. }));
        assert!(err.to_string().contains("reset 3") || format!("{:?}", err).contains("reset 3"));
    }

    #[tokio::test]
    async fn body_consumed_is_not_retried() {
        let origin = ScriptedOrigin::new(vec![Err(EdgeError::BodyConsumed)]);
        let metrics = MetricsAccumulator::default();

        let err = passthrough(&origin, &request(), &Cancellation::new(), &metrics)
            .await
            .unwrap_err();

        assert_eq!(origin.calls(), 1);
        assert!(matches!(err, EdgeError::BodyConsumed));
    }

    #[tokio::test]
    async fn client_abort_returns_synthetic_499() {
        let origin = ScriptedOrigin::new(vec![Err(EdgeError::ClientAborted)]);
        let metrics = MetricsAccumulator::default();

        let result = passthrough(&origin, &request(), &Cancellation::new(), &metrics)
            .await
            .unwrap();

        assert_eq!(origin.calls(), 1);
        assert_eq!(result.into_response().status.as_u16(), 499);
    }

    #[tokio::test]
    async fn cancellation_is_fatal() {
        let cancellation = Cancellation::new();
        cancellation.cancel();
        let origin = ScriptedOrigin::new(vec![Ok(EdgeResponse::text("unused"))]);
        let metrics = MetricsAccumulator::default();

        let err = passthrough(&origin, &request(), &cancellation, &metrics)
            .await
            .unwrap_err();
        assert!(matches!(err, EdgeError::Cancelled));
        assert_eq!(origin.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_retry_counts() {
        let calls = AtomicU64::new(0);
        let result: Result<()> = backoff_retry(MAX_ATTEMPTS, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EdgeError::Http("nope".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicU64::new(0);
        let result: Result<()> = backoff_retry(MAX_ATTEMPTS, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EdgeError::Cancelled) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn decorate_moves_side_channel_and_strips_internal() {
        let mut response = EdgeResponse::text("ok");
        response
            .headers
            .insert("age", HeaderValue::from_static("30"));
        response
            .headers
            .insert("x-edge-cache-status", HeaderValue::from_static("hit"));
        response
            .headers
            .insert("x-edge-srv", HeaderValue::from_static("internal"));
        response
            .headers
            .insert("via", HeaderValue::from_static("1.1 edge"));
        response
            .headers
            .insert("etag", HeaderValue::from_static("\"abc\""));

        let (response, forwarded) = decorate(response);
        assert_eq!(forwarded.get("age").unwrap(), "30");
        assert_eq!(forwarded.get("x-edge-cache-status").unwrap(), "hit");
        assert!(response.headers.get("x-edge-srv").is_none());
        assert!(response.headers.get("via").is_none());
        assert_eq!(response.headers.get("etag").unwrap(), "\"abc\"");
    }
}
