use std::panic::{self, AssertUnwindSafe};

use crate::buffer::OutputBuffer;
use crate::errors::{WriteError, WriteResult};
use crate::http::{HttpRequest, KnownHeader};
use crate::result::{Body, ResultValue};
use crate::session::{LogLevel, Session};

use super::Response;

const SPACE: &[u8] = b" ";
const CRLF: &[u8] = b"\r\n";
const TWO_CRLF: &[u8] = b"\r\n\r\n";
const SERVER_HEADER: &[u8] = b"Server: coffer\r\n";
const NULL_CONTENT_LENGTH: &[u8] = b"Content-Length: 0\r\n";

/// Digits reserved for a measured Content-Length.
pub const CONTENT_LENGTH_WIDTH: usize = 10;

/// Runs `HttpRequest::recover` when dropped.
struct Recovery<'a>(Option<&'a HttpRequest>);

impl Drop for Recovery<'_> {
    fn drop(&mut self) {
        if let Some(request) = self.0 {
            request.recover();
        }
    }
}

impl Response {
    /// Serialize into `out`.
    ///
    /// Returns true when `out` holds a complete response. On failure the
    /// error is logged and the session disposed; the bytes in `out` must not
    /// be sent. The request is recovered either way.
    pub fn write(&self, out: &mut OutputBuffer) -> bool {
        let (request, session) = {
            let state = self.lock();
            (state.request.clone(), state.session.clone())
        };
        let _recovery = Recovery(request.as_deref());

        match self.write_response(out, request.as_deref(), session.as_deref()) {
            Ok(()) => true,
            Err(err) => {
                if let Some(session) = session {
                    log_write_error(&*session, request.as_deref(), &err);
                    session.dispose();
                }
                false
            }
        }
    }

    fn write_response(
        &self,
        out: &mut OutputBuffer,
        request: Option<&HttpRequest>,
        session: Option<&dyn Session>,
    ) -> WriteResult {
        let mut state = self.lock();
        let body = state.body.take().unwrap_or(Body::Empty);

        match body {
            Body::Value(ref value) => {
                state.headers.set(KnownHeader::ContentType, value.content_type());
                value.apply_headers(&mut state.headers);
                state.headers.remove(KnownHeader::ContentLength);
                state.headers.remove(KnownHeader::TransferEncoding);
            }
            Body::File(ref block) => block.apply_headers(&mut state.headers),
            Body::Empty => {
                state.headers.remove(KnownHeader::ContentLength);
                state.headers.remove(KnownHeader::TransferEncoding);
            }
        }

        // Status line
        out.write_text(state.http_version);
        out.write_bytes(SPACE);
        out.write_text(&state.code);
        out.write_bytes(SPACE);
        out.write_text(&state.message);
        out.write_bytes(CRLF);

        out.write_bytes(SERVER_HEADER);
        state.headers.write(out);

        for cookie in state.cookies.iter() {
            out.write_bytes(KnownHeader::SetCookie.prefix());
            out.write_text(cookie);
            out.write_bytes(CRLF);
        }

        // Body writers may call back into the response
        drop(state);

        match body {
            Body::File(block) => {
                out.write_bytes(CRLF);
                block.write(out)?;
            }
            Body::Value(value) if value.has_body() => match value.length() {
                Some(len) if len > 0 => {
                    out.write_bytes(KnownHeader::ContentLength.prefix());
                    out.write_text(&len.to_string());
                    out.write_bytes(TWO_CRLF);

                    let start = out.position();
                    self.write_value(&*value, out)?;

                    let written = out.position() - start;
                    if written != len {
                        return Err(WriteError::LengthMismatch {
                            declared: len,
                            written,
                        });
                    }
                }
                _ => {
                    out.write_bytes(KnownHeader::ContentLength.prefix());
                    let content_length = out.allocate(CONTENT_LENGTH_WIDTH);
                    out.write_bytes(TWO_CRLF);

                    let start = out.position();
                    self.write_value(&*value, out)?;

                    let written = out.position() - start;
                    out.patch(content_length, &written.to_string())?;
                }
            },
            Body::Value(_) | Body::Empty => {
                out.write_bytes(NULL_CONTENT_LENGTH);
                out.write_bytes(CRLF);
            }
        }

        if let (Some(session), Some(request)) = (session, request) {
            self.log_response(session, request);
        }

        Ok(())
    }

    /// Run an application writer. A panic is turned into a write error so
    /// the session is disposed like any other failure.
    fn write_value(&self, value: &dyn ResultValue, out: &mut OutputBuffer) -> WriteResult {
        panic::catch_unwind(AssertUnwindSafe(|| value.write(out, self)))
            .unwrap_or_else(|_| Err(WriteError::Body("result writer panicked".to_string())))
    }

    fn log_response(&self, session: &dyn Session, request: &HttpRequest) {
        let logger = session.logger();

        if logger.enabled(LogLevel::Debug) {
            let remote_addr = request.remote_addr.to_string();
            let response = self.to_string();

            logger.log(
                LogLevel::Debug,
                "http response detail",
                &[
                    ("remote_addr", remote_addr.as_str()),
                    ("response", response.as_str()),
                ],
            );
        }

        if logger.enabled(LogLevel::Info) {
            let remote_addr = request.remote_addr.to_string();
            let method: &str = request.method.as_ref();
            let (code, message) = self.status();

            logger.log(
                LogLevel::Info,
                "http response",
                &[
                    ("remote_addr", remote_addr.as_str()),
                    ("http.method", method),
                    ("http.url", request.url.as_str()),
                    ("http.status_code", code.as_str()),
                    ("http.status_message", message.as_str()),
                    ("trace_id", request.context.trace_id.as_str()),
                ],
            );
        }
    }
}

fn log_write_error(session: &dyn Session, request: Option<&HttpRequest>, err: &WriteError) {
    let logger = session.logger();
    if !logger.enabled(LogLevel::Error) {
        return;
    }

    let error = err.to_string();

    match request {
        Some(request) => {
            let remote_addr = request.remote_addr.to_string();
            let method: &str = request.method.as_ref();

            logger.log(
                LogLevel::Error,
                "response write data error",
                &[
                    ("remote_addr", remote_addr.as_str()),
                    ("http.method", method),
                    ("http.url", request.url.as_str()),
                    ("trace_id", request.context.trace_id.as_str()),
                    ("error", error.as_str()),
                ],
            );
        }
        None => logger.log(
            LogLevel::Error,
            "response write data error",
            &[("error", error.as_str())],
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::http::HeaderTable;
    use crate::result::{ActionResult, FileBlock, NoBody, Payload, ResultValue, TextResult};
    use crate::testing::{split_response, CaptureSession};

    struct Measured {
        data: Vec<u8>,
    }

    impl ResultValue for Measured {
        fn content_type(&self) -> &str {
            "application/octet-stream"
        }

        fn length(&self) -> Option<usize> {
            None
        }

        fn write(&self, out: &mut OutputBuffer, _: &Response) -> WriteResult {
            out.write_bytes(&self.data);
            Ok(())
        }
    }

    struct Lying {
        declared: usize,
        data: &'static [u8],
    }

    impl ResultValue for Lying {
        fn content_type(&self) -> &str {
            "text/plain"
        }

        fn length(&self) -> Option<usize> {
            Some(self.declared)
        }

        fn write(&self, out: &mut OutputBuffer, _: &Response) -> WriteResult {
            out.write_bytes(self.data);
            Ok(())
        }
    }

    struct Failing;

    impl ResultValue for Failing {
        fn content_type(&self) -> &str {
            "text/plain"
        }

        fn length(&self) -> Option<usize> {
            None
        }

        fn write(&self, out: &mut OutputBuffer, _: &Response) -> WriteResult {
            out.write_text("half a bo");
            Err(WriteError::Body("upstream went away".to_string()))
        }
    }

    struct Panicking;

    impl ResultValue for Panicking {
        fn content_type(&self) -> &str {
            "text/plain"
        }

        fn length(&self) -> Option<usize> {
            Some(4)
        }

        fn write(&self, out: &mut OutputBuffer, _: &Response) -> WriteResult {
            out.write_text("ha");
            panic!("writer bug");
        }
    }

    struct WithHeaders;

    impl ResultValue for WithHeaders {
        fn content_type(&self) -> &str {
            "text/event-stream"
        }

        fn length(&self) -> Option<usize> {
            Some(2)
        }

        fn apply_headers(&self, headers: &mut HeaderTable) {
            headers.set(KnownHeader::CacheControl, "no-cache");
        }

        fn write(&self, out: &mut OutputBuffer, response: &Response) -> WriteResult {
            // Writers may read the response while the body is written
            assert_eq!(response.status().0, "200");
            out.write_text("ok");
            Ok(())
        }
    }

    fn bound(session: &Arc<CaptureSession>, url: &str) -> Arc<Response> {
        let resp = Arc::new(Response::new());
        resp.bind(session.request(url), session.clone());
        resp
    }

    #[test]
    fn test_not_found_without_body() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/missing");

        resp.set_status("404", "Not Found");
        assert!(resp.result_empty());

        assert_eq!(
            session.output(0),
            "HTTP/1.1 404 Not Found\r\nServer: coffer\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn test_known_length_body() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/hello");

        assert!(resp.result(TextResult::plain("hello")));

        let (head, body) = split_response(&session.output(0));
        assert_eq!(
            head,
            "HTTP/1.1 200 OK\r\nServer: coffer\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 5"
        );
        assert_eq!(body, "hello");
    }

    #[test]
    fn test_unknown_length_patched() {
        // Full-width counts are covered by test_placeholder_full_width_patch
        for len in [0usize, 1, 9, 10, 99, 100, 12_345, 1_000_000] {
            let session = CaptureSession::new();
            let resp = bound(&session, "http://localhost/blob");

            let data = vec![b'z'; len];
            assert!(resp.result(Payload::value(Measured { data: data.clone() })));

            let output = session.output_bytes(0);
            let split = output
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .expect("no header end");
            let head = std::str::from_utf8(&output[..split]).unwrap();
            let body = &output[split + 4..];

            let field = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .expect("no content-length");

            assert_eq!(field.len(), CONTENT_LENGTH_WIDTH);
            assert_eq!(field.trim_end().parse::<usize>().unwrap(), len);
            assert_eq!(body, &data[..]);
        }
    }

    #[test]
    fn test_placeholder_full_width_patch() {
        let mut out = OutputBuffer::with_capacity(32);
        let placeholder = out.allocate(CONTENT_LENGTH_WIDTH);
        out.patch(placeholder, &u32::MAX.to_string()).unwrap();

        assert_eq!(out.as_bytes(), b"4294967295");
    }

    #[test]
    fn test_json_data_wrapped_with_url_and_id() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/users/3?verbose=1");
        resp.set_request_id("req-1");

        assert!(resp.result(json!({"name": "ann"})));

        let (head, body) = split_response(&session.output(0));
        assert!(head.contains("\r\nContent-Type: application/json\r\n"));
        assert!(head.contains("\r\nContent-Length: 62        "));
        assert_eq!(
            body,
            r#"{"code":0,"data":{"name":"ann"},"url":"/users/3","id":"req-1"}"#
        );
    }

    #[test]
    fn test_action_result_passes_through() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/x");

        assert!(resp.result(ActionResult::error(3, "bad")));

        let (_, body) = split_response(&session.output(0));
        assert_eq!(body, r#"{"code":3,"error":"bad","data":null,"url":"","id":""}"#);
    }

    #[test]
    fn test_no_body_result() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/old");
        resp.set_status("302", "Found");

        assert!(resp.result(Payload::value(NoBody::redirect("/new"))));

        assert_eq!(
            session.output(0),
            "HTTP/1.1 302 Found\r\nServer: coffer\r\nContent-Type: text/plain; charset=utf-8\r\n\
             Location: /new\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn test_headers_then_cookies_in_order() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/login");

        resp.set_header("X-One", "1");
        resp.set_cookie("b", "2", None);
        resp.set_cookie("a", "1 1", None);
        resp.set_cookie("c", "3", None);
        assert!(resp.result_empty());

        assert_eq!(
            session.output(0),
            "HTTP/1.1 200 OK\r\nServer: coffer\r\nX-One: 1\r\n\
             Set-Cookie: b=2;path=/;HttpOnly\r\n\
             Set-Cookie: a=1+1;path=/;HttpOnly\r\n\
             Set-Cookie: c=3;path=/;HttpOnly\r\n\
             Content-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn test_file_block_frames_itself() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/style.css");

        assert!(resp.result(FileBlock::whole(b"p{}".to_vec()).with_content_type("text/css")));

        assert_eq!(
            session.output(0),
            "HTTP/1.1 200 OK\r\nServer: coffer\r\nContent-Type: text/css\r\nContent-Length: 3\r\n\r\np{}"
        );
    }

    #[test]
    fn test_result_apply_headers_and_reentrant_writer() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/events");

        assert!(resp.result(Payload::value(WithHeaders)));

        let (head, body) = split_response(&session.output(0));
        assert!(head.contains("\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n"));
        assert_eq!(body, "ok");
    }

    #[test]
    fn test_writer_error_disposes_and_recovers() {
        let session = CaptureSession::new();
        let req = session.request("http://localhost/broken");
        let recovered = Arc::new(AtomicUsize::new(0));
        let r = recovered.clone();
        req.on_recover(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let resp = Arc::new(Response::new());
        resp.bind(req, session.clone());

        assert!(resp.result(Payload::value(Failing)));

        assert_eq!(session.num_sends(), 1);
        assert_eq!(session.num_outputs(), 0);
        assert_eq!(session.num_disposed(), 1);
        assert_eq!(recovered.load(Ordering::SeqCst), 1);

        let errors = session.logger.lines_at(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("upstream went away"));
        assert!(errors[0].contains("/broken"));
    }

    #[test]
    fn test_writer_panic_disposes_and_recovers() {
        let session = CaptureSession::new();
        let req = session.request("http://localhost/panics");
        let recovered = Arc::new(AtomicUsize::new(0));
        let r = recovered.clone();
        req.on_recover(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let resp = Arc::new(Response::new());
        resp.bind(req, session.clone());

        assert!(resp.result(Payload::value(Panicking)));

        assert_eq!(session.num_sends(), 1);
        assert_eq!(session.num_outputs(), 0);
        assert_eq!(session.num_disposed(), 1);
        assert_eq!(recovered.load(Ordering::SeqCst), 1);

        let errors = session.logger.lines_at(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("result writer panicked"));

        // The response is still usable after the unwind
        assert_eq!(resp.status().0, "200");
    }

    #[test]
    fn test_application_framing_headers_replaced() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/hello");

        resp.set_header(KnownHeader::ContentLength, "999");
        resp.set_header(KnownHeader::TransferEncoding, "chunked");
        assert!(resp.result(TextResult::plain("hello")));

        let (head, body) = split_response(&session.output(0));
        assert_eq!(
            head,
            "HTTP/1.1 200 OK\r\nServer: coffer\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 5"
        );
        assert_eq!(body, "hello");

        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/gone");

        resp.set_status("410", "Gone");
        resp.set_header(KnownHeader::ContentLength, "12");
        assert!(resp.result_empty());

        assert_eq!(
            session.output(0),
            "HTTP/1.1 410 Gone\r\nServer: coffer\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn test_length_mismatch_is_write_error() {
        let session = CaptureSession::new();
        let resp = bound(&session, "http://localhost/short");

        assert!(resp.result(Payload::value(Lying {
            declared: 10,
            data: b"short",
        })));

        assert_eq!(session.num_outputs(), 0);
        assert_eq!(session.num_disposed(), 1);
    }

    #[test]
    fn test_success_recovers_once() {
        let session = CaptureSession::new();
        let req = session.request("http://localhost/");
        let recovered = Arc::new(AtomicUsize::new(0));
        let r = recovered.clone();
        req.on_recover(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let resp = Arc::new(Response::new());
        resp.bind(req, session.clone());

        assert!(resp.result(TextResult::plain("x")));
        assert!(!resp.result(TextResult::plain("y")));
        assert!(!resp.result_empty());

        assert_eq!(session.num_outputs(), 1);
        assert_eq!(session.num_disposed(), 0);
        assert_eq!(recovered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_completion_writes_once() {
        const THREADS: usize = 12;

        for _ in 0..25 {
            let session = CaptureSession::new();
            let resp = bound(&session, "http://localhost/race");
            let barrier = Barrier::new(THREADS);
            let winners = AtomicUsize::new(0);

            thread::scope(|s| {
                for n in 0..THREADS {
                    let resp = resp.clone();
                    let barrier = &barrier;
                    let winners = &winners;

                    s.spawn(move || {
                        barrier.wait();
                        let won = if n % 2 == 0 {
                            resp.result(TextResult::plain(format!("handler {}", n)))
                        } else {
                            resp.result_with_status("504", "Gateway Timeout", None)
                        };

                        if won {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            });

            assert_eq!(winners.load(Ordering::SeqCst), 1);
            assert_eq!(session.num_sends(), 1);
            assert_eq!(session.num_outputs(), 1);

            let output = session.output(0);
            assert!(
                output.starts_with("HTTP/1.1 200 OK\r\n")
                    || output.starts_with("HTTP/1.1 504 Gateway Timeout\r\n")
            );
        }
    }

    #[test]
    fn test_info_log_gated_by_logger() {
        let quiet = CaptureSession::with_level(LogLevel::Error);
        let resp = bound(&quiet, "http://localhost/q");
        assert!(resp.result_empty());
        assert!(quiet.logger.lines().is_empty());

        let chatty = CaptureSession::with_level(LogLevel::Debug);
        let resp = bound(&chatty, "http://localhost/c");
        resp.set_status("204", "No Content");
        assert!(resp.result_empty());

        let info = chatty.logger.lines_at(LogLevel::Info);
        assert_eq!(info.len(), 1);
        assert!(info[0].contains("http.method=GET"));
        assert!(info[0].contains("http.status_code=204"));
        assert!(info[0].contains("remote_addr=127.0.0.1:40000"));
        assert_eq!(chatty.logger.lines_at(LogLevel::Debug).len(), 1);
    }
}
