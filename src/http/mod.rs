use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use random_fast_rng::{FastRng, Random};

pub mod cookie;
pub mod header;

pub use header::{HeaderName, HeaderTable, KnownHeader};

pub const HTTP_1_0: &str = "HTTP/1.0";
pub const HTTP_1_1: &str = "HTTP/1.1";

/// RFC 1123 date, the form used by `Date` and cookie `expires`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

type RecoverFn = Box<dyn FnOnce() + Send>;

pub struct HttpRequest {
    pub method: http_types::Method,
    pub url: http_types::Url,
    pub version: &'static str,
    pub headers: Vec<(String, String)>,
    pub remote_addr: SocketAddr,
    pub context: Context,
    pub keep_alive: bool,
    pub content_type: Option<String>,
    pub content_length: usize,
    pub body: Vec<u8>,
    recovery: Mutex<Option<RecoverFn>>,
}

impl HttpRequest {
    pub fn new(method: http_types::Method, url: http_types::Url, remote_addr: SocketAddr) -> Self {
        Self {
            method,
            url,
            version: HTTP_1_1,
            headers: vec![],
            remote_addr,
            context: Context::new(),
            keep_alive: true,
            content_type: None,
            content_length: 0,
            body: vec![],
            recovery: Mutex::new(None),
        }
    }

    /// Request path without the query string.
    pub fn base_url(&self) -> &str {
        self.url.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Register the callback run by [`HttpRequest::recover`].
    pub fn on_recover<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.recovery.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(f));
    }

    /// Hand the request's resources back. Runs the recovery callback at most
    /// once; later calls do nothing.
    pub fn recover(&self) {
        let recovery = self
            .recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(f) = recovery {
            f();
        }
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("version", &self.version)
            .field("remote_addr", &self.remote_addr)
            .field("trace_id", &self.context.trace_id)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Context {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        let mut rng = FastRng::new();
        let trace_id: [u8; 16] = rng.gen();
        let span_id: [u8; 8] = rng.gen();

        Self {
            trace_id: hex::encode(trace_id),
            span_id: hex::encode(span_id),
            parent_id: None,
        }
    }

    pub fn from_vals(trace_id: &str, parent_id: &str) -> Self {
        let mut rng = FastRng::new();
        let span_id: [u8; 8] = rng.gen();

        Self {
            trace_id: trace_id.to_string(),
            parent_id: Some(parent_id.to_string()),
            span_id: hex::encode(span_id),
        }
    }

    pub fn parent_id_as_ref(&self) -> Option<&str> {
        self.parent_id.as_ref().map(|s| &s[..])
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    pub(crate) fn request(method: http_types::Method, url: &str) -> HttpRequest {
        let url = http_types::Url::parse(url).unwrap();
        HttpRequest::new(method, url, "127.0.0.1:40000".parse().unwrap())
    }

    #[test]
    fn test_base_url_strips_query() {
        let req = request(http_types::Method::Get, "http://localhost/users/7?full=1");
        assert_eq!(req.base_url(), "/users/7");
    }

    #[test]
    fn test_recover_runs_once() {
        let req = request(http_types::Method::Get, "http://localhost/");
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        req.on_recover(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        req.recover();
        req.recover();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let mut req = request(http_types::Method::Post, "http://localhost/");
        req.headers.push(("Content-Type".to_string(), "text/plain".to_string()));

        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.header("host"), None);
    }

    #[test]
    fn test_http_date_format() {
        use chrono::TimeZone;

        let at = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(http_date(at), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_context_ids_are_hex() {
        let ctx = Context::new();
        assert_eq!(ctx.trace_id.len(), 32);
        assert_eq!(ctx.span_id.len(), 16);
        assert!(ctx.parent_id_as_ref().is_none());
    }
}
