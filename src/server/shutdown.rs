use std::io;

use mio::{net::TcpListener, Poll};
use ndjsonlogger::info;

pub struct ShutdownData<'s> {
    pub listener: &'s mut TcpListener,
    pub poll: &'s Poll,
}

/// Stop accepting. Client streams are closed by the caller as they go idle.
pub fn shutdown_loop(s: ShutdownData<'_>) -> Vec<io::Error> {
    info!("coffer is shutting down");

    let mut io_errs = vec![];

    if let Err(e) = s.poll.registry().deregister(s.listener) {
        io_errs.push(e);
    }

    io_errs
}
