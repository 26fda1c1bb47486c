use std::io::{self, Read};
use std::mem;
use std::net::SocketAddr;

use crate::errors::HttpError;
use crate::http::{Context, HttpRequest, HTTP_1_0, HTTP_1_1};

const MAX_HEADERS: usize = 32;
const MIN_FREE: usize = 1024;

pub enum State {
    Partial(Reader),
    /// A request and any bytes that followed it on the stream.
    Complete(Box<HttpRequest>, Vec<u8>),
    StreamEOF,
}

enum InnerState {
    Begin((usize, Vec<u8>)),
    HaveHeader(Box<PartialHttpReq>),
}

/// Incremental request reader. Consumed by each read and handed back in
/// [`State::Partial`] until the request is complete.
pub struct Reader {
    remote_addr: SocketAddr,
    max_body_size: usize,
    state: InnerState,
}

impl Reader {
    pub fn new(remote_addr: SocketAddr, buffer_size: usize, max_body_size: usize) -> Self {
        Self::resume(remote_addr, buffer_size, max_body_size, vec![])
    }

    /// A reader starting from bytes already taken off the stream, such as
    /// the remainder after a pipelined request.
    pub fn resume(
        remote_addr: SocketAddr,
        buffer_size: usize,
        max_body_size: usize,
        mut leftover: Vec<u8>,
    ) -> Self {
        let buf_len = leftover.len();
        leftover.resize(buffer_size.max(buf_len + MIN_FREE), 0);

        Self {
            remote_addr,
            max_body_size,
            state: InnerState::Begin((buf_len, leftover)),
        }
    }

    /// Read until the stream would block or the request is complete.
    pub fn read_stream<R: Read>(self, stream: &mut R) -> Result<State, HttpError> {
        let Self {
            remote_addr,
            max_body_size,
            state,
        } = self;

        match state {
            InnerState::Begin((buf_len, buf)) => {
                read_header(remote_addr, max_body_size, buf_len, buf, stream)
            }
            InnerState::HaveHeader(partial_http_req) => {
                read_body(remote_addr, max_body_size, partial_http_req, stream)
            }
        }
    }

    /// True once some bytes of a request have arrived.
    pub fn has_data(&self) -> bool {
        match self.state {
            InnerState::Begin((buf_len, _)) => buf_len > 0,
            InnerState::HaveHeader(_) => true,
        }
    }
}

fn read_header<R: Read>(
    remote_addr: SocketAddr,
    max_body_size: usize,
    mut buf_len: usize,
    mut buf: Vec<u8>,
    stream: &mut R,
) -> Result<State, HttpError> {
    loop {
        // Buffered bytes may already hold a whole request
        if buf_len > 0 {
            if let Some(partial_http_req) = parse_header(&buf[..buf_len], max_body_size)? {
                return read_body(remote_addr, max_body_size, Box::new(partial_http_req), stream);
            }
        }

        if buf.len() - buf_len < MIN_FREE {
            buf.resize(buf.len() * 2, 0);
        }

        let bytes_read = match stream.read(&mut buf[buf_len..]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(State::Partial(Reader {
                    remote_addr,
                    max_body_size,
                    state: InnerState::Begin((buf_len, buf)),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HttpError::Io(("failed to read tcp stream for server request", e))),
        };

        if bytes_read == 0 {
            return Ok(State::StreamEOF);
        }

        buf_len += bytes_read;
    }
}

fn parse_header(buf: &[u8], max_body_size: usize) -> Result<Option<PartialHttpReq>, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    match request.parse(buf).map_err(HttpError::HeaderParse)? {
        httparse::Status::Partial => Ok(None),
        httparse::Status::Complete(header_size) => {
            let mut partial_http_req = PartialHttpReq::new(&request, max_body_size)?;
            partial_http_req.take_body(&buf[header_size..]);
            Ok(Some(partial_http_req))
        }
    }
}

fn read_body<R: Read>(
    remote_addr: SocketAddr,
    max_body_size: usize,
    mut partial_http_req: Box<PartialHttpReq>,
    stream: &mut R,
) -> Result<State, HttpError> {
    while !partial_http_req.is_done() {
        let start = partial_http_req.bytes_read;

        match stream.read(&mut partial_http_req.body[start..]) {
            Ok(0) => return Err(HttpError::BadValue("stream EOF without complete body")),
            Ok(n) => partial_http_req.bytes_read += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(State::Partial(Reader {
                    remote_addr,
                    max_body_size,
                    state: InnerState::HaveHeader(partial_http_req),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(HttpError::Io(("failed to read request body on tcp stream", e))),
        }
    }

    let leftover = mem::take(&mut partial_http_req.leftover);

    Ok(State::Complete(
        Box::new(partial_http_req.into_request(remote_addr)),
        leftover,
    ))
}

struct PartialHttpReq {
    method: http_types::Method,
    version: &'static str,
    headers: Vec<(String, String)>,
    url: http_types::Url,
    content_type: Option<String>,
    content_length: usize,
    keep_alive: bool,
    body: Vec<u8>,
    bytes_read: usize,
    leftover: Vec<u8>,
    context: Context,
}

impl PartialHttpReq {
    fn new(request: &httparse::Request<'_, '_>, max_body_size: usize) -> Result<Self, HttpError> {
        let mut headers = vec![];

        let method = request
            .method
            .ok_or(HttpError::BadValue("http request missing method"))?
            .parse::<http_types::Method>()
            .map_err(|_| HttpError::BadValue("http request with unrecognised method"))?;

        let version = match request.version {
            Some(0) => HTTP_1_0,
            _ => HTTP_1_1,
        };

        let mut content_type: Option<String> = None;
        let mut host: Option<&str> = None;
        let mut keep_alive = version == HTTP_1_1;
        let mut content_length = 0;
        let mut context: Option<Context> = None;

        for h in request.headers.iter() {
            let value = std::str::from_utf8(h.value)
                .map_err(|_| HttpError::BadValue("header value not utf8"))?;

            if h.name.eq_ignore_ascii_case("Content-Type") {
                content_type = Some(value.to_string());
            }

            if h.name.eq_ignore_ascii_case("Content-Length") {
                content_length = value
                    .parse()
                    .map_err(|_| HttpError::BadValue("Content-Length not uint"))?;
            }

            if h.name.eq_ignore_ascii_case("Host") {
                host = Some(value);
            }

            if h.name.eq_ignore_ascii_case("Traceparent") {
                if let Ok(ctx) = parse_context(value) {
                    context = Some(ctx);
                }
            }

            if h.name.eq_ignore_ascii_case("Connection") {
                if value.eq_ignore_ascii_case("close") {
                    keep_alive = false;
                } else if value.eq_ignore_ascii_case("keep-alive") {
                    keep_alive = true;
                }
            }

            headers.push((h.name.to_string(), value.to_string()));
        }

        if content_length > max_body_size {
            return Err(HttpError::BadValue("Content-Length exceeds max body size"));
        }

        let host = host.ok_or(HttpError::BadValue("http request missing host header"))?;
        let path = request
            .path
            .ok_or(HttpError::BadValue("http request missing path"))?;

        Ok(Self {
            method,
            version,
            headers,
            content_type,
            content_length,
            keep_alive,
            body: vec![],
            bytes_read: 0,
            leftover: vec![],
            context: context.unwrap_or_else(Context::new),
            url: url(host, path)?,
        })
    }

    /// Take the body bytes read along with the header. Anything past
    /// Content-Length belongs to the next request.
    fn take_body(&mut self, bytes: &[u8]) {
        let (body, rest) = bytes.split_at(bytes.len().min(self.content_length));

        self.body.reserve(self.content_length);
        self.body.extend_from_slice(body);
        self.body.resize(self.content_length, 0);
        self.bytes_read = body.len();
        self.leftover = rest.to_vec();
    }

    fn is_done(&self) -> bool {
        self.bytes_read == self.content_length
    }

    fn into_request(self, remote_addr: SocketAddr) -> HttpRequest {
        let mut req = HttpRequest::new(self.method, self.url, remote_addr);
        req.version = self.version;
        req.headers = self.headers;
        req.context = self.context;
        req.keep_alive = self.keep_alive;
        req.content_type = self.content_type;
        req.content_length = self.content_length;
        req.body = self.body;
        req
    }
}

fn url(host: &str, path: &str) -> Result<http_types::Url, HttpError> {
    if path.starts_with("http://") || path.starts_with("https://") {
        http_types::Url::parse(path).map_err(|_| HttpError::BadValue("invalid http path"))
    } else if path.starts_with('/') {
        http_types::Url::parse(&format!("http://{}{}", host, path))
            .map_err(|_| HttpError::BadValue("invalid path in http header"))
    } else {
        Err(HttpError::BadValue("invalid path in http header"))
    }
}

/// W3C `traceparent`: `00-<32 hex trace id>-<16 hex parent id>-<flags>`.
fn parse_context(val: &str) -> Result<Context, &'static str> {
    let mut trace_id = "";
    let mut parent_id = "";

    for (n, v) in val.split('-').enumerate() {
        match n {
            0 => {
                if v != "00" {
                    return Err("unsupported traceparent version");
                }
            }
            1 => trace_id = v,
            2 => parent_id = v,
            3 => {}
            _ => return Err("traceparent header should have four parts"),
        }
    }

    if trace_id.len() != 32 || parent_id.len() != 16 {
        return Err("badly formed traceparent header");
    }

    let is_hex = |s: &str| s.chars().all(|c| "0123456789abcdef".contains(c));
    if !is_hex(trace_id) || !is_hex(parent_id) {
        return Err("traceparent ids must be lowercase hex");
    }

    Ok(Context::from_vals(trace_id, parent_id))
}
