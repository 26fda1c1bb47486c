//! Per-request response state and its exactly-once completion.
//!
//! A [`Response`] is shared as `Arc<Response>` between the handler, any
//! deferred completion path (another thread, a timeout) and the session that
//! eventually writes it. Handler-facing setters lock the inner state; the
//! [`CompletionGuard`] decides which completion attempt gets to set the body
//! and hand the response to the session.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::http::cookie::{format_cookie, DEFAULT_PATH};
use crate::http::{http_date, HeaderName, HeaderTable, HttpRequest, KnownHeader, HTTP_1_1};
use crate::result::{classify, Body, Payload};
use crate::session::Session;

mod encoder;
mod guard;
mod pool;

pub use guard::CompletionGuard;
pub use pool::ResponsePool;

pub const DEFAULT_CODE: &str = "200";
pub const DEFAULT_MESSAGE: &str = "OK";

pub struct Response {
    state: Mutex<State>,
    completion: CompletionGuard,
    is_async: AtomicBool,
}

struct State {
    http_version: &'static str,
    code: String,
    message: String,
    headers: HeaderTable,
    cookies: Vec<String>,
    body: Option<Body>,
    request_id: String,
    request: Option<Arc<HttpRequest>>,
    session: Option<Arc<dyn Session>>,
}

impl State {
    fn new() -> Self {
        Self {
            http_version: HTTP_1_1,
            code: DEFAULT_CODE.to_string(),
            message: DEFAULT_MESSAGE.to_string(),
            headers: HeaderTable::new(),
            cookies: vec![],
            body: None,
            request_id: String::new(),
            request: None,
            session: None,
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
            completion: CompletionGuard::new(),
            is_async: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the request being answered and the session to write to.
    pub fn bind(&self, request: Arc<HttpRequest>, session: Arc<dyn Session>) {
        let mut state = self.lock();
        state.http_version = request.version;
        state.request_id = request.context.trace_id.clone();
        state.request = Some(request);
        state.session = Some(session);
    }

    /// Back to the freshly constructed state, unbound.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.http_version = HTTP_1_1;
        state.code.clear();
        state.code.push_str(DEFAULT_CODE);
        state.message.clear();
        state.message.push_str(DEFAULT_MESSAGE);
        state.headers.clear();
        state.cookies.clear();
        state.body = None;
        state.request_id.clear();
        state.request = None;
        state.session = None;
        drop(state);

        self.is_async.store(false, Ordering::Release);
        self.completion.reset();
    }

    pub fn request(&self) -> Option<Arc<HttpRequest>> {
        self.lock().request.clone()
    }

    pub fn request_id(&self) -> String {
        self.lock().request_id.clone()
    }

    pub fn set_request_id(&self, id: &str) {
        let mut state = self.lock();
        state.request_id.clear();
        state.request_id.push_str(id);
    }

    pub fn http_version(&self) -> &'static str {
        self.lock().http_version
    }

    pub fn set_http_version(&self, version: &'static str) {
        self.lock().http_version = version;
    }

    /// Code and message are written to the status line verbatim.
    pub fn set_status(&self, code: &str, message: &str) {
        let mut state = self.lock();
        state.code.clear();
        state.code.push_str(code);
        state.message.clear();
        state.message.push_str(message);
    }

    pub fn status(&self) -> (String, String) {
        let state = self.lock();
        (state.code.clone(), state.message.clone())
    }

    pub fn set_header<N, V>(&self, name: N, value: V)
    where
        N: Into<HeaderName>,
        V: Into<String>,
    {
        self.lock().headers.set(name, value);
    }

    pub fn append_header<N, V>(&self, name: N, value: V)
    where
        N: Into<HeaderName>,
        V: Into<String>,
    {
        self.lock().headers.append(name, value);
    }

    pub fn header<N: Into<HeaderName>>(&self, name: N) -> Option<String> {
        self.lock().headers.get(name).map(str::to_string)
    }

    pub fn headers(&self) -> HeaderTable {
        self.lock().headers.clone()
    }

    pub fn set_content_type(&self, content_type: &str) {
        self.set_header(KnownHeader::ContentType, content_type);
    }

    pub fn set_date(&self) {
        self.set_date_at(Utc::now());
    }

    pub fn set_date_at(&self, at: DateTime<Utc>) {
        self.set_header(KnownHeader::Date, http_date(at));
    }

    pub fn set_cookie(&self, name: &str, value: &str, expires: Option<DateTime<Utc>>) {
        self.set_cookie_with_path(name, value, DEFAULT_PATH, expires);
    }

    /// Cookies with an empty name are ignored.
    pub fn set_cookie_with_path(
        &self,
        name: &str,
        value: &str,
        path: &str,
        expires: Option<DateTime<Utc>>,
    ) {
        if let Some(cookie) = format_cookie(name, value, path, expires) {
            self.lock().cookies.push(cookie);
        }
    }

    pub fn cookies(&self) -> Vec<String> {
        self.lock().cookies.clone()
    }

    /// Mark that completion happens after the handler returns.
    pub fn mark_async(&self) {
        self.is_async.store(true, Ordering::Release);
    }

    pub fn is_async(&self) -> bool {
        self.is_async.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.completion.is_completed()
    }

    /// Complete with `payload`. Returns false if the response was already
    /// completed, in which case nothing happens.
    pub fn result(self: &Arc<Self>, payload: impl Into<Payload>) -> bool {
        let body = {
            let state = self.lock();
            let url = state.request.as_ref().map(|r| r.base_url()).unwrap_or("");
            classify(payload.into(), url, &state.request_id)
        };

        self.complete(body, None)
    }

    /// Complete without a body.
    pub fn result_empty(self: &Arc<Self>) -> bool {
        self.complete(Body::Empty, None)
    }

    /// Complete with a status that only applies if this call wins, e.g. a
    /// timeout answering 504 while the handler may still complete normally.
    pub fn result_with_status(
        self: &Arc<Self>,
        code: &str,
        message: &str,
        payload: Option<Payload>,
    ) -> bool {
        let body = match payload {
            None => Body::Empty,
            Some(payload) => {
                let state = self.lock();
                let url = state.request.as_ref().map(|r| r.base_url()).unwrap_or("");
                classify(payload, url, &state.request_id)
            }
        };

        self.complete(body, Some((code, message)))
    }

    fn complete(self: &Arc<Self>, body: Body, status: Option<(&str, &str)>) -> bool {
        if !self.completion.try_complete() {
            return false;
        }

        let session = {
            let mut state = self.lock();
            if let Some((code, message)) = status {
                state.code.clear();
                state.code.push_str(code);
                state.message.clear();
                state.message.push_str(message);
            }
            state.body = Some(body);
            state.session.clone()
        };

        // An unbound response keeps its body; there is nowhere to send it.
        if let Some(session) = session {
            session.send(self.clone());
        }

        true
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();

        match state.request {
            Some(ref req) => writeln!(
                f,
                "{} {} response {} {}",
                req.method,
                req.url,
                state.code,
                state.message
            )?,
            None => writeln!(f, "response {} {}", state.code, state.message)?,
        }

        write!(f, "{}", state.headers)?;
        for cookie in state.cookies.iter() {
            writeln!(f, "{}", cookie)?;
        }

        Ok(())
    }
}
