//! Single-threaded mio HTTP/1.x server driving [`Response`] completion.

use std::collections::HashMap;
use std::io::{self, Write};
use std::mem;
use std::net::SocketAddr;
use std::ops::RangeFrom;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::{self, Instant};

use mio::{net::TcpListener, net::TcpStream, Events, Interest, Poll, Token};
use ndjsonlogger::{debug, info, warn};

use crate::buffer::BufferPool;
use crate::config::Config;
use crate::errors::{fatal_io_error, HttpError, RuntimeError, RuntimeResult};
use crate::http::{HttpRequest, KnownHeader};
use crate::response::{Response, ResponsePool};
use crate::session::Logger;

mod connection;
pub use connection::{Connection, Notifier, Outgoing};
mod reader;
pub use reader::{Reader, State as ReadState};
mod shutdown;
use shutdown::{shutdown_loop, ShutdownData};
mod timers;
pub use timers::{TimerQueue, Timeout};

const SERVER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const FIRST_CLIENT_TOKEN: usize = 2;
// Upper bound on a poll so the running flag is noticed
const POLL_TIME: time::Duration = time::Duration::from_millis(100);

const HTTP_400_RESPONSE: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nServer: coffer\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
const HTTP_408_RESPONSE: &[u8] =
    b"HTTP/1.1 408 Request Timeout\r\nServer: coffer\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// Application entry point, called on the event loop thread.
///
/// A handler completes `response` inline or hands a clone to another thread
/// and returns. Responses not completed within the configured completion
/// timeout are answered with `504 Gateway Timeout`.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &Arc<HttpRequest>, response: &Arc<Response>);
}

enum Phase {
    Reading(Reader),
    Waiting,
    Closing,
}

struct Client {
    stream: TcpStream,
    remote_addr: SocketAddr,
    conn: Arc<Connection>,
    phase: Phase,
    serial: u64,
    writing: Option<Outgoing>,
    /// Bytes of a pipelined request read along with the current one.
    leftover: Vec<u8>,
}

enum Flushed {
    Blocked,
    Done { close: bool },
    Failed(io::Error),
}

impl Client {
    /// Write queued output until the stream blocks or a response is fully
    /// sent.
    fn flush(&mut self) -> Flushed {
        loop {
            if self.writing.is_none() {
                self.writing = self.conn.next_outgoing();
            }

            let out = match self.writing.as_mut() {
                Some(out) => out,
                None => return Flushed::Blocked,
            };

            if out.is_done() {
                let close = out.close;
                self.writing = None;
                return Flushed::Done { close };
            }

            match self.stream.write(out.remaining()) {
                Ok(0) => return Flushed::Failed(io::ErrorKind::WriteZero.into()),
                Ok(n) => out.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Flushed::Blocked,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Flushed::Failed(e),
            }
        }
    }
}

struct Server {
    cfg: Arc<Config>,
    poll: Poll,
    notifier: Arc<Notifier>,
    buffers: Arc<BufferPool>,
    responses: Arc<ResponsePool>,
    handler: Arc<dyn Handler>,
    logger: Arc<dyn Logger>,
    clients: HashMap<Token, Client>,
    pending: HashMap<u64, Arc<Response>>,
    timers: TimerQueue,
    tokens: RangeFrom<usize>,
    serials: RangeFrom<u64>,
    shutting_down: bool,
    errors: Vec<io::Error>,
}

pub fn run_server(
    cfg: Arc<Config>,
    running: Arc<AtomicBool>,
    mut listener: TcpListener,
    handler: Arc<dyn Handler>,
    logger: Arc<dyn Logger>,
) -> RuntimeResult {
    let poll =
        Poll::new().map_err(|err| fatal_io_error("server couldn't create poll instance", err))?;
    let mut events = Events::with_capacity(64);

    poll.registry()
        .register(&mut listener, SERVER_TOKEN, Interest::READABLE)
        .map_err(|err| fatal_io_error("server couldn't register tcp listener", err))?;

    let notifier = Notifier::new(poll.registry(), WAKER_TOKEN)
        .map_err(|err| fatal_io_error("server couldn't create waker", err))?;

    let mut server = Server {
        buffers: BufferPool::new(cfg.buffer_size, cfg.buffer_pool_size),
        responses: ResponsePool::new(cfg.response_pool_size),
        cfg,
        poll,
        notifier: Arc::new(notifier),
        handler,
        logger,
        clients: HashMap::new(),
        pending: HashMap::new(),
        timers: TimerQueue::new(),
        tokens: FIRST_CLIENT_TOKEN..,
        serials: 0..,
        shutting_down: false,
        errors: Vec::with_capacity(32),
    };

    let mut ready = Vec::with_capacity(64);
    let mut expired = Vec::with_capacity(64);
    let mut shutdown_instant: Option<Instant> = None;

    loop {
        if let Some(instant) = shutdown_instant {
            // Every response completes within the completion timeout
            if server.clients.is_empty() || instant.elapsed() >= server.cfg.completion_timeout {
                break Ok(());
            }
        }

        let timeout = match server.timers.next_wait(Instant::now()) {
            Some(wait) => wait.min(POLL_TIME),
            None => POLL_TIME,
        };

        let poll_res = server.poll.poll(&mut events, Some(timeout));

        if (poll_res.is_err() || !running.load(Ordering::SeqCst)) && !server.shutting_down {
            let errs = shutdown_loop(ShutdownData {
                listener: &mut listener,
                poll: &server.poll,
            });
            server.errors.extend(errs);
            server.begin_shutdown();
            shutdown_instant = Some(Instant::now());
        }

        for ev in &events {
            match ev.token() {
                SERVER_TOKEN => server.accept(&listener),
                WAKER_TOKEN => {}
                tk if server.clients.contains_key(&tk) => {
                    if ev.is_readable() {
                        server.read(tk);
                    }
                    if ev.is_writable() {
                        server.flush(tk);
                    }
                }
                // Closed earlier in this batch
                tk if tk.0 >= FIRST_CLIENT_TOKEN => {}
                _ => return Err(RuntimeError::UnknownToken),
            }
        }

        server.notifier.drain(&mut ready);
        for tk in ready.drain(..) {
            server.flush(tk);
        }

        server.timers.expire(Instant::now(), &mut expired);
        for timeout in expired.drain(..) {
            server.timeout(timeout);
        }

        // Output queued by completions the timeouts forced
        server.notifier.drain(&mut ready);
        for tk in ready.drain(..) {
            server.flush(tk);
        }

        for _err in server.errors.drain(..) {
            debug!("i/o error in loop", { error = &format!("{}", _err) });
        }
    }
}

impl Server {
    fn next_serial(&mut self) -> u64 {
        self.serials.next().unwrap_or_default()
    }

    fn accept(&mut self, listener: &TcpListener) {
        loop {
            let (mut stream, remote_addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    self.errors.push(e);
                    return;
                }
            };

            if self.shutting_down {
                continue;
            }

            if self.clients.len() >= self.cfg.max_conns {
                // Drop stream now
                warn!("maximum number of tcp streams exceeded", {
                    "cfg.max_conns": usize = self.cfg.max_conns
                });
                continue;
            }

            let tk = match self.tokens.next() {
                Some(n) => Token(n),
                None => return,
            };

            if let Err(err) = self.poll.registry().register(
                &mut stream,
                tk,
                Interest::READABLE | Interest::WRITABLE,
            ) {
                self.errors.push(err);
                continue;
            }

            let conn = Arc::new(Connection::new(
                tk,
                self.buffers.clone(),
                self.logger.clone(),
                self.notifier.clone(),
            ));

            let serial = self.next_serial();
            self.timers.push(
                Instant::now() + self.cfg.request_read_timeout,
                Timeout::RequestRead { token: tk, serial },
            );

            self.clients.insert(
                tk,
                Client {
                    stream,
                    remote_addr,
                    conn,
                    phase: Phase::Reading(Reader::new(
                        remote_addr,
                        self.cfg.buffer_size,
                        self.cfg.max_body_size,
                    )),
                    serial,
                    writing: None,
                    leftover: vec![],
                },
            );
        }
    }

    fn read(&mut self, tk: Token) {
        let client = match self.clients.get_mut(&tk) {
            Some(client) => client,
            None => return,
        };

        let reader = match mem::replace(&mut client.phase, Phase::Waiting) {
            Phase::Reading(reader) => reader,
            other => {
                // Next request is read once the current response is sent
                client.phase = other;
                return;
            }
        };

        match reader.read_stream(&mut client.stream) {
            Ok(ReadState::Partial(reader)) => client.phase = Phase::Reading(reader),
            Ok(ReadState::Complete(request, leftover)) => {
                client.leftover = leftover;
                self.dispatch(tk, request);
            }
            Ok(ReadState::StreamEOF) => self.close(tk),
            Err(error) => self.read_error(tk, error),
        }
    }

    fn read_error(&mut self, tk: Token, error: HttpError) {
        match error {
            HttpError::Io((reason, ref err)) => {
                info!("i/o failed on tcp stream", {
                    reason,
                    error = &format!("{}", err)
                });
                self.close(tk);
            }
            HttpError::HeaderParse(_) | HttpError::BadValue(_) => {
                info!("invalid http request", { error = &format!("{}", error) });
                self.send_canned(tk, HTTP_400_RESPONSE);
            }
        }
    }

    fn dispatch(&mut self, tk: Token, request: Box<HttpRequest>) {
        let serial = self.next_serial();

        let conn = match self.clients.get_mut(&tk) {
            Some(client) => {
                client.phase = Phase::Waiting;
                client.serial = serial;
                client.conn.clone()
            }
            None => return,
        };

        let request: Arc<HttpRequest> = Arc::from(request);
        let response = self.responses.acquire(&request, conn);

        if !request.keep_alive || self.shutting_down {
            response.set_header(KnownHeader::Connection, "close");
        }

        self.pending.insert(serial, response.clone());
        self.timers.push(
            Instant::now() + self.cfg.completion_timeout,
            Timeout::Completion(serial),
        );

        self.handler.handle(&request, &response);
    }

    fn flush(&mut self, tk: Token) {
        let client = match self.clients.get_mut(&tk) {
            Some(client) => client,
            None => return,
        };

        if client.conn.is_disposed() {
            self.close(tk);
            return;
        }

        match client.flush() {
            Flushed::Blocked => {}
            Flushed::Failed(e) => {
                self.errors.push(e);
                self.close(tk);
            }
            Flushed::Done { close } => {
                self.pending.remove(&client.serial);

                if close || self.shutting_down || matches!(client.phase, Phase::Closing) {
                    self.close(tk);
                    return;
                }

                let serial = self.next_serial();
                let client = match self.clients.get_mut(&tk) {
                    Some(client) => client,
                    None => return,
                };
                client.serial = serial;
                client.phase = Phase::Reading(Reader::resume(
                    client.remote_addr,
                    self.cfg.buffer_size,
                    self.cfg.max_body_size,
                    mem::take(&mut client.leftover),
                ));

                self.timers.push(
                    Instant::now() + self.cfg.request_read_timeout,
                    Timeout::RequestRead { token: tk, serial },
                );

                // Bytes of the next request may already be buffered
                self.read(tk);
            }
        }
    }

    fn send_canned(&mut self, tk: Token, bytes: &[u8]) {
        if let Some(client) = self.clients.get_mut(&tk) {
            client.phase = Phase::Closing;
            client.conn.enqueue(client.conn.canned(bytes));
        }
    }

    fn timeout(&mut self, timeout: Timeout) {
        match timeout {
            Timeout::RequestRead { token, serial } => {
                let reading = match self.clients.get(&token) {
                    Some(client) => {
                        client.serial == serial && matches!(client.phase, Phase::Reading(_))
                    }
                    None => false,
                };

                if reading {
                    info!("request read timeout", {
                        "cfg.request_read_timeout_ms": usize = self.cfg.request_read_timeout.as_millis() as usize
                    });
                    self.send_canned(token, HTTP_408_RESPONSE);
                }
            }
            Timeout::Completion(serial) => {
                if let Some(response) = self.pending.remove(&serial) {
                    if response.result_with_status("504", "Gateway Timeout", None) {
                        warn!("response not completed in time", {
                            trace_id = &response.request_id()
                        });
                    }
                }
            }
        }
    }

    fn begin_shutdown(&mut self) {
        self.shutting_down = true;

        // Idle streams are closed now, the rest once their response is sent
        let idle: Vec<Token> = self
            .clients
            .iter()
            .filter(|(_, client)| matches!(client.phase, Phase::Reading(_)))
            .map(|(tk, _)| *tk)
            .collect();

        for tk in idle {
            self.close(tk);
        }
    }

    fn close(&mut self, tk: Token) {
        if let Some(mut client) = self.clients.remove(&tk) {
            let res = self
                .poll
                .registry()
                .deregister(&mut client.stream)
                .and_then(|_| client.stream.shutdown(std::net::Shutdown::Both));

            if let Err(e) = res {
                self.errors.push(e);
            }
        }
    }
}
