//! Bypass response construction.
//!
//! When the calling proxy has advertised it can finish a request itself,
//! the engine answers with a marker header and a compact JSON body
//! describing what changed: the effective URL, a request-header diff, and
//! optionally the cookie-derived response headers. Construction is
//! synchronous and pure given its inputs; no network call is made.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::http::headers;
use crate::http::EdgeResponse;

/// Value of the bypass marker header.
pub const MARKER_VALUE: &str = "1";

/// JSON body of a bypass response. Absent fields are omitted entirely, so
/// a no-op bypass serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BypassBody {
    /// Present iff the effective request URL differs from the one the
    /// proxy originally sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_url: Option<String>,
    /// Header diff against the initial request; `""` marks a deletion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<BTreeMap<String, String>>,
    /// Cookie-derived response headers, gated by a compatibility flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, Vec<String>>>,
}

/// Build the bypass response.
///
/// `initial_url` is the absolute URL the proxy originally sent;
/// `effective_url` is where the request ended up after any rewrites.
/// `cookie_headers`, when given, is embedded as `response_headers`.
pub fn build(
    initial_url: &str,
    effective_url: &str,
    request_diff: BTreeMap<String, String>,
    cookie_headers: Option<&HeaderMap>,
) -> Result<EdgeResponse> {
    let body = BypassBody {
        rewrite_url: (effective_url != initial_url).then(|| effective_url.to_string()),
        request_headers: (!request_diff.is_empty()).then_some(request_diff),
        response_headers: cookie_headers
            .map(headers::serialize)
            .filter(|serialized| !serialized.is_empty()),
    };

    let mut response = EdgeResponse::json(&body)?;
    response.status = StatusCode::OK;
    response.headers.insert(
        headers::BYPASS_RESPONSE,
        HeaderValue::from_static(MARKER_VALUE),
    );
    Ok(response)
}
