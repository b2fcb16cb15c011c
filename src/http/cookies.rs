//! Buffered cookie store.
//!
//! Functions request `set`/`delete` operations during a chain run; the
//! store buffers them in call order and applies them to an output header
//! set exactly once, at the end of the run. Validation happens eagerly at
//! `set` time so a function sees the failure synchronously.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use cookie::{Cookie, SameSite};
use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue};
use tracing::warn;

use crate::error::{EdgeError, Result};

/// A buffered cookie operation, applied in insertion order.
#[derive(Debug, Clone)]
enum CookieOp {
    Set(Cookie<'static>),
    Delete(Cookie<'static>),
}

/// Buffers cookie operations requested by functions for one request tree.
#[derive(Debug, Default)]
pub struct CookieStore {
    ops: Mutex<Vec<CookieOp>>,
    applied: AtomicBool,
}

impl CookieStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a `set` operation.
    ///
    /// Invalid attribute combinations raise immediately, not at apply time.
    pub fn set(&self, cookie: Cookie<'static>) -> Result<()> {
        validate(&cookie)?;
        self.push(CookieOp::Set(cookie));
        Ok(())
    }

    /// Buffer a `delete` operation for the named cookie.
    pub fn delete(&self, name: impl Into<String>, domain: Option<String>, path: Option<String>) {
        let mut cookie = Cookie::new(name.into(), "");
        if let Some(domain) = domain {
            cookie.set_domain(domain);
        }
        if let Some(path) = path {
            cookie.set_path(path);
        }
        cookie.make_removal();
        self.push(CookieOp::Delete(cookie));
    }

    /// Whether any operations are buffered.
    pub fn is_empty(&self) -> bool {
        self.ops.lock().expect("cookie store lock").is_empty()
    }

    /// Replay the buffered operations onto a header set, in order.
    ///
    /// Applied at most once per request tree; a second call is a no-op
    /// (the final result may be built from the same store along different
    /// control paths, but cookies must not be emitted twice).
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        if self.applied.swap(true, Ordering::SeqCst) {
            warn!("Cookie store applied twice; ignoring the second apply");
            return Ok(());
        }

        for value in self.header_values()? {
            headers.append(SET_COOKIE, value);
        }
        Ok(())
    }

    /// The cookie-derived header set, for embedding into a bypass response
    /// body instead of the response headers.
    pub fn serialized_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for value in self.header_values()? {
            headers.append(SET_COOKIE, value);
        }
        Ok(headers)
    }

    fn push(&self, op: CookieOp) {
        self.ops.lock().expect("cookie store lock").push(op);
    }

    fn header_values(&self) -> Result<Vec<HeaderValue>> {
        let ops = self.ops.lock().expect("cookie store lock");
        ops.iter()
            .map(|op| {
                let cookie = match op {
                    CookieOp::Set(cookie) | CookieOp::Delete(cookie) => cookie,
                };
                HeaderValue::from_str(&cookie.to_string()).map_err(EdgeError::from)
            })
            .collect()
    }
}

/// Eager validation of a cookie requested via `set`.
fn validate(cookie: &Cookie<'static>) -> Result<()> {
    let name = cookie.name();
    if name.is_empty() {
        return Err(EdgeError::Cookie("cookie name must not be empty".into()));
    }
    if name
        .chars()
        .any(|c| c.is_control() || c.is_whitespace() || matches!(c, ';' | ',' | '=' | '"'))
    {
        return Err(EdgeError::Cookie(format!(
            "cookie name '{}' contains invalid characters",
            name
        )));
    }
    if cookie
        .value()
        .chars()
        .any(|c| c.is_control() || matches!(c, ';' | ','))
    {
        return Err(EdgeError::Cookie(format!(
            "value of cookie '{}' contains invalid characters",
            name
        )));
    }
    if cookie.same_site() == Some(SameSite::None) && cookie.secure() != Some(true) {
        return Err(EdgeError::Cookie(format!(
            "cookie '{}' with SameSite=None must also be Secure",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_operations_in_insertion_order() {
        let store = CookieStore::new();
        store.set(Cookie::new("a", "1")).unwrap();
        store.delete("b", None, Some("/admin".into()));
        store.set(Cookie::new("c", "3")).unwrap();

        let mut headers = HeaderMap::new();
        store.apply(&mut headers).unwrap();

        let values: Vec<_> = headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], "a=1");
        assert!(values[1].starts_with("b=;"));
        assert!(values[1].contains("Path=/admin"));
        assert!(values[1].contains("Max-Age=0"));
        assert_eq!(values[2], "c=3");
    }

    #[test]
    fn apply_is_idempotent() {
        let store = CookieStore::new();
        store.set(Cookie::new("a", "1")).unwrap();

        let mut headers = HeaderMap::new();
        store.apply(&mut headers).unwrap();
        store.apply(&mut headers).unwrap();
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 1);
    }

    #[test]
    fn set_validates_eagerly() {
        let store = CookieStore::new();
        assert!(store.set(Cookie::new("", "v")).is_err());
        assert!(store.set(Cookie::new("bad name", "v")).is_err());
        assert!(store.set(Cookie::new("ok", "bad;value")).is_err());

        let mut lax_less = Cookie::new("cross", "site");
        lax_less.set_same_site(SameSite::None);
        assert!(store.set(lax_less.clone()).is_err());

        lax_less.set_secure(true);
        assert!(store.set(lax_less).is_ok());
    }

    #[test]
    fn serialized_headers_does_not_consume_the_store() {
        let store = CookieStore::new();
        store.set(Cookie::new("a", "1")).unwrap();

        let serialized = store.serialized_headers().unwrap();
        assert_eq!(serialized.get_all(SET_COOKIE).iter().count(), 1);

        let mut headers = HeaderMap::new();
        store.apply(&mut headers).unwrap();
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 1);
    }
}
