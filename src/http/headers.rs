//! Protocol header names and header-set transformations.
//!
//! The calling proxy negotiates with the engine through a set of `x-edge-*`
//! headers that are parsed and then stripped before user code sees the
//! request. The bypass protocol additionally needs a diff of request
//! headers between invocation start and end of run, and a multi-value
//! serialization of cookie-derived response headers.

use std::collections::BTreeMap;

use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

/// Ordered list of function names the proxy wants to run.
pub const FUNCTIONS: &str = "x-edge-functions";
/// Request id assigned by the proxy.
pub const REQUEST_ID: &str = "x-edge-request-id";
/// Span id for distributed tracing.
pub const SPAN_ID: &str = "x-edge-span-id";
/// Opaque token authorizing log shipping for this request.
pub const LOG_TOKEN: &str = "x-edge-log-token";
/// Site identifier blob.
pub const SITE_INFO: &str = "x-edge-site-info";
/// Account identifier blob.
pub const ACCOUNT_INFO: &str = "x-edge-account-info";
/// Deploy identifier.
pub const DEPLOY_ID: &str = "x-edge-deploy-id";
/// Geo location blob.
pub const GEO: &str = "x-edge-geo";
/// Identity blob.
pub const IDENTITY: &str = "x-edge-identity";
/// Cache mode directive; the literal `manual` means caching is on.
pub const CACHE_MODE: &str = "x-edge-cache";
/// Bypass-negotiation directive sent by the proxy.
pub const BYPASS: &str = "x-edge-bypass";
/// Per-request debug logging toggle.
pub const DEBUG_LOGGING: &str = "x-edge-debug-logging";
/// Feature flags blob.
pub const FEATURE_FLAGS: &str = "x-edge-feature-flags";
/// Host as seen by the proxy.
pub const FORWARDED_HOST: &str = "x-forwarded-host";
/// Protocol as seen by the proxy.
pub const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Marker header on a bypass response; always carries the value `1`.
pub const BYPASS_RESPONSE: &str = "x-edge-function-bypass";
/// Marker header on a 500 produced by an uncaught function error.
pub const UNCAUGHT_ERROR: &str = "x-edge-uncaught-error";

/// Metadata headers stripped from the request before user code runs.
pub const STRIPPED_REQUEST_HEADERS: [&str; 13] = [
    FUNCTIONS,
    REQUEST_ID,
    SPAN_ID,
    LOG_TOKEN,
    SITE_INFO,
    ACCOUNT_INFO,
    DEPLOY_ID,
    GEO,
    IDENTITY,
    CACHE_MODE,
    BYPASS,
    DEBUG_LOGGING,
    FEATURE_FLAGS,
];

/// Headers moved from an origin response into the internal side channel,
/// to be merged into the final response by the top-level handler.
pub const SIDE_CHANNEL_HEADERS: [&str; 3] =
    ["x-edge-cache-tag", "x-edge-cache-status", "age"];

/// Hop-by-hop loop-detection headers removed from origin responses.
pub const LOOP_DETECTION_HEADERS: [&str; 2] = ["via", "x-edge-loop-count"];

/// Compute the difference between two header sets.
///
/// Keys present in `after` with a value different from (or absent in)
/// `before` map to the new value; keys present in `before` but absent from
/// `after` map to `""`, marking a deletion. An empty result means the two
/// sets hold identical key/value pairs.
pub fn diff(before: &HeaderMap, after: &HeaderMap) -> BTreeMap<String, String> {
    let mut changes = BTreeMap::new();

    for name in after.keys() {
        let new_value = joined_value(after, name);
        match before.get(name) {
            Some(_) if joined_value(before, name) == new_value => {}
            _ => {
                changes.insert(name.as_str().to_string(), new_value);
            }
        }
    }

    for name in before.keys() {
        if !after.contains_key(name) {
            changes.insert(name.as_str().to_string(), String::new());
        }
    }

    changes
}

/// Serialize a header set into a name-to-values mapping.
///
/// Comma-joined values are split into individual entries, except for
/// `set-cookie`, which HTTP forbids folding: each occurrence stays one
/// entry.
pub fn serialize(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).to_string();
        let entry = out.entry(name.as_str().to_string()).or_default();

        if name == SET_COOKIE {
            entry.push(value);
        } else {
            entry.extend(value.split(',').map(|v| v.trim().to_string()));
        }
    }

    out
}

/// Merge origin side-channel headers into a final response header set,
/// logging a warning when a header set by user code gets overwritten.
pub fn merge_forwarded(headers: &mut HeaderMap, forwarded: &HeaderMap) {
    for (name, value) in forwarded {
        if headers.contains_key(name) {
            warn!(
                "Overwriting user-set header '{}' with origin-provided value",
                name
            );
        }
        headers.insert(name.clone(), value.clone());
    }
}

/// Join all values of a header into the single comparable string form.
fn joined_value(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a header value as a lowercase string, ignoring invalid UTF-8.
pub(crate) fn header_str(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).trim().to_string()
}
