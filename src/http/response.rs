//! Response types for the edgechain engine.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;

use crate::http::headers;

/// HTTP response produced by a function or assembled by the engine.
#[derive(Debug, Clone, Default)]
pub struct EdgeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl EdgeResponse {
    /// Create an empty response with the given status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Create an empty 200 response.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Create a text response.
    pub fn text(content: impl Into<String>) -> Self {
        let mut response = Self::ok();
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response.body = Bytes::from(content.into());
        response
    }

    /// Create a JSON response.
    pub fn json<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        let mut response = Self::ok();
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.body = Bytes::from(serde_json::to_vec(data)?);
        Ok(response)
    }

    /// Create a plain-text error response.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let mut response = Self::text(message);
        response.status = status;
        response
    }

    /// Add a header, replacing any existing value.
    pub fn header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the body as text.
    pub fn text_body(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Normalize a response returned by a function: the declared length is
    /// not guaranteed to match the body the engine ends up sending, so
    /// `content-length` is always dropped; a compat flag switches the
    /// response to chunked transfer instead.
    pub fn normalize(&mut self, force_chunked: bool) {
        self.headers.remove(http::header::CONTENT_LENGTH);
        if force_chunked {
            self.headers
                .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
    }
}

/// Final result of a chain run, tagged where the value is produced instead
/// of being re-detected later.
#[derive(Debug)]
pub enum ChainResponse {
    /// Response produced by a function or assembled locally.
    Plain(EdgeResponse),
    /// Response obtained from the origin; `forwarded` carries the
    /// side-channel header subset to merge into the final response.
    Origin {
        response: EdgeResponse,
        forwarded: HeaderMap,
    },
    /// Protocol-shortcut response for the calling proxy. Cookies are
    /// embedded in its body and must not also be applied to headers.
    Bypass(EdgeResponse),
}

impl ChainResponse {
    /// Whether this is a bypass response.
    pub fn is_bypass(&self) -> bool {
        matches!(self, ChainResponse::Bypass(_))
    }

    /// Flatten into a single response, merging any origin side-channel
    /// headers into the visible header set.
    pub fn into_response(self) -> EdgeResponse {
        match self {
            ChainResponse::Plain(response) | ChainResponse::Bypass(response) => response,
            ChainResponse::Origin {
                mut response,
                forwarded,
            } => {
                headers::merge_forwarded(&mut response.headers, &forwarded);
                response
            }
        }
    }
}
