use std::collections::VecDeque;
use std::io;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mio::{Registry, Token, Waker};
use ndjsonlogger::debug;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::response::Response;
use crate::session::{Logger, Session};

/// Wakes the event loop and tells it which connections have output.
pub struct Notifier {
    waker: Waker,
    ready: Mutex<Vec<Token>>,
}

impl Notifier {
    pub fn new(registry: &Registry, token: Token) -> io::Result<Self> {
        Ok(Self {
            waker: Waker::new(registry, token)?,
            ready: Mutex::new(vec![]),
        })
    }

    pub fn notify(&self, token: Token) {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token);

        if let Err(_e) = self.waker.wake() {
            debug!("couldn't wake event loop", { error = &format!("{}", _e) });
        }
    }

    pub fn drain(&self, into: &mut Vec<Token>) {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        into.append(&mut ready);
    }
}

/// Serialized bytes waiting to go out on a client stream.
pub struct Outgoing {
    pub buffer: PooledBuffer,
    pub written: usize,
    /// Close the stream once written.
    pub close: bool,
}

impl Outgoing {
    pub fn remaining(&self) -> &[u8] {
        &self.buffer.as_bytes()[self.written..]
    }

    pub fn is_done(&self) -> bool {
        self.written == self.buffer.len()
    }
}

#[derive(Default)]
struct Outbound {
    queue: VecDeque<Outgoing>,
    disposed: bool,
}

/// The [`Session`] side of a client stream.
///
/// Responses may complete on any thread. `send` serializes on the calling
/// thread, queues the bytes and wakes the loop, which owns the socket.
pub struct Connection {
    token: Token,
    buffers: Arc<BufferPool>,
    logger: Arc<dyn Logger>,
    notifier: Arc<Notifier>,
    outbound: Mutex<Outbound>,
}

impl Connection {
    pub fn new(
        token: Token,
        buffers: Arc<BufferPool>,
        logger: Arc<dyn Logger>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            token,
            buffers,
            logger,
            notifier,
            outbound: Mutex::new(Outbound::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Outbound> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes produced outside a [`Response`], such as a 408.
    pub fn enqueue(&self, outgoing: Outgoing) {
        {
            let mut outbound = self.lock();
            if outbound.disposed {
                return;
            }
            outbound.queue.push_back(outgoing);
        }

        self.notifier.notify(self.token);
    }

    pub fn canned(&self, bytes: &[u8]) -> Outgoing {
        let mut buffer = self.buffers.acquire();
        buffer.write_bytes(bytes);

        Outgoing {
            buffer,
            written: 0,
            close: true,
        }
    }

    pub fn next_outgoing(&self) -> Option<Outgoing> {
        self.lock().queue.pop_front()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}

impl Session for Connection {
    fn send(&self, response: Arc<Response>) {
        let close = response.request().map_or(true, |req| !req.keep_alive);

        let mut buffer = self.buffers.acquire();
        if !response.write(&mut buffer) {
            return;
        }

        self.enqueue(Outgoing {
            buffer,
            written: 0,
            close,
        });
    }

    fn dispose(&self) {
        let dropped = {
            let mut outbound = self.lock();
            outbound.disposed = true;
            mem::take(&mut outbound.queue)
        };
        drop(dropped);

        self.notifier.notify(self.token);
    }

    fn logger(&self) -> &dyn Logger {
        &*self.logger
    }
}
