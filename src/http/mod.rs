//! HTTP types for the edgechain engine: the request wrapper with its
//! internal metadata record, response types, header diff/serialize helpers
//! and the buffered cookie store.

pub mod cookies;
pub mod headers;
mod request;
mod response;

pub use cookies::CookieStore;
pub use request::{BypassSupport, CacheMode, EdgeRequest, RequestMeta};
pub use response::{ChainResponse, EdgeResponse};
