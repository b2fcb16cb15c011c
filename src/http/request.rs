//! Request wrapper with parsed, then-stripped, internal metadata.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::error::{EdgeError, Result};
use crate::http::headers;

/// Whether the calling proxy intends to cache the response.
///
/// Anything other than the literal `manual` means caching is off; only
/// uncached requests are eligible for a passthrough bypass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    Manual,
    #[default]
    Off,
}

impl CacheMode {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("manual") => CacheMode::Manual,
            _ => CacheMode::Off,
        }
    }
}

/// Bypass capabilities advertised by the calling proxy.
///
/// Parsed from a comma-separated directive of `passthrough` and `rewrite`
/// tokens; the legacy literal `1` means passthrough only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BypassSupport {
    pub passthrough: bool,
    pub rewrite: bool,
}

impl BypassSupport {
    fn parse(value: Option<&str>) -> Self {
        let mut support = BypassSupport::default();
        let Some(value) = value else {
            return support;
        };

        if value.trim() == "1" {
            support.passthrough = true;
            return support;
        }

        for token in value.split(',') {
            match token.trim() {
                "passthrough" => support.passthrough = true,
                "rewrite" => support.rewrite = true,
                _ => {}
            }
        }
        support
    }
}

/// Internal metadata record parsed from the inbound negotiation headers.
///
/// Geo, site, account and identity blobs are carried as opaque strings;
/// decoding them is the platform layer's concern, not the engine's.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub request_id: String,
    pub span_id: Option<String>,
    pub log_token: Option<String>,
    pub site_info: Option<String>,
    pub account_info: Option<String>,
    pub deploy_id: Option<String>,
    pub geo: Option<String>,
    pub identity: Option<String>,
    pub feature_flags: Option<String>,
    pub cache_mode: CacheMode,
    pub bypass: BypassSupport,
    pub forwarded_host: Option<String>,
    pub forwarded_proto: Option<String>,
    pub debug_logging: bool,
    pub function_names: Vec<String>,
}

impl RequestMeta {
    /// Parse the negotiation headers and strip them from the header set so
    /// they are invisible to user code.
    ///
    /// The request id and function list are required; their absence is a
    /// caller contract violation surfaced as a 400 by the request handler.
    pub fn parse(headers: &mut HeaderMap) -> Result<Self> {
        let value = |headers: &HeaderMap, name: &str| -> Option<String> {
            headers.get(name).map(headers::header_str)
        };

        let request_id = value(headers, headers::REQUEST_ID)
            .ok_or_else(|| EdgeError::user(format!("missing {} header", headers::REQUEST_ID)))?;

        let function_names: Vec<String> = value(headers, headers::FUNCTIONS)
            .ok_or_else(|| EdgeError::user(format!("missing {} header", headers::FUNCTIONS)))?
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        let cache_mode = CacheMode::parse(value(headers, headers::CACHE_MODE).as_deref());
        let bypass = BypassSupport::parse(value(headers, headers::BYPASS).as_deref());
        let debug_logging = value(headers, headers::DEBUG_LOGGING)
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);

        let meta = RequestMeta {
            request_id,
            span_id: value(headers, headers::SPAN_ID),
            log_token: value(headers, headers::LOG_TOKEN),
            site_info: value(headers, headers::SITE_INFO),
            account_info: value(headers, headers::ACCOUNT_INFO),
            deploy_id: value(headers, headers::DEPLOY_ID),
            geo: value(headers, headers::GEO),
            identity: value(headers, headers::IDENTITY),
            feature_flags: value(headers, headers::FEATURE_FLAGS),
            cache_mode,
            bypass,
            // Forwarded host/proto are read but intentionally not stripped.
            forwarded_host: value(headers, headers::FORWARDED_HOST),
            forwarded_proto: value(headers, headers::FORWARDED_PROTO),
            debug_logging,
            function_names,
        };

        for name in headers::STRIPPED_REQUEST_HEADERS {
            headers.remove(name);
        }

        Ok(meta)
    }
}

/// Inbound HTTP request decorated with the parsed metadata record.
///
/// Read-only after construction except for header mutations performed by
/// functions; a rewrite produces a new request via [`EdgeRequest::with_uri`].
#[derive(Debug, Clone)]
pub struct EdgeRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    meta: Arc<RequestMeta>,
}

impl EdgeRequest {
    /// Build a request from its parts, parsing and stripping the
    /// negotiation headers.
    pub fn from_parts(
        method: Method,
        uri: Uri,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<Self> {
        let meta = RequestMeta::parse(&mut headers)?;
        Ok(Self {
            method,
            uri,
            headers,
            body,
            meta: Arc::new(meta),
        })
    }

    /// The metadata record parsed at construction.
    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    pub(crate) fn meta_arc(&self) -> Arc<RequestMeta> {
        Arc::clone(&self.meta)
    }

    /// URL path of the current request.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Scheme of the request as seen by the proxy.
    pub fn effective_proto(&self) -> &str {
        match self.meta.forwarded_proto.as_deref() {
            Some(proto) if !proto.is_empty() => proto,
            _ => self.uri.scheme_str().unwrap_or("http"),
        }
    }

    /// Host of the request as seen by the proxy.
    pub fn effective_host(&self) -> &str {
        match self.meta.forwarded_host.as_deref() {
            Some(host) if !host.is_empty() => host,
            _ => self.uri.host().unwrap_or(""),
        }
    }

    /// Absolute form of the current request URL.
    pub fn effective_url(&self) -> String {
        let path_and_query = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!(
            "{}://{}{}",
            self.effective_proto(),
            self.effective_host(),
            path_and_query
        )
    }

    /// Whether a rewrite target stays on this request's host.
    ///
    /// A target without an authority is a relative path and is always
    /// same-origin.
    pub fn is_same_origin(&self, target: &Uri) -> bool {
        match target.host() {
            None => true,
            Some(host) => host == self.effective_host(),
        }
    }

    /// Produce the request bound to a rewrite target, keeping method,
    /// headers, body and metadata.
    pub fn with_uri(&self, uri: Uri) -> Self {
        let mut request = self.clone();
        request.uri = uri;
        request
    }
}
