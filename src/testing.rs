//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::BufferPool;
use crate::http::HttpRequest;
use crate::response::Response;
use crate::session::{LogLevel, Logger, Session};

/// Keeps every enabled line as `"msg key=value ..."`.
pub(crate) struct RecordingLogger {
    min_level: LogLevel,
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    pub(crate) fn new(min_level: LogLevel) -> Self {
        Self {
            min_level,
            lines: Mutex::new(vec![]),
        }
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub(crate) fn lines_at(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    fn log(&self, level: LogLevel, msg: &str, tags: &[(&'static str, &str)]) {
        if !self.enabled(level) {
            return;
        }

        let mut line = msg.to_string();
        for (key, value) in tags {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }

        self.lines.lock().unwrap().push((level, line));
    }
}

/// Session that serializes responses into memory.
pub(crate) struct CaptureSession {
    pub(crate) logger: RecordingLogger,
    buffers: Arc<BufferPool>,
    outputs: Mutex<Vec<Vec<u8>>>,
    sends: AtomicUsize,
    disposed: AtomicUsize,
}

impl CaptureSession {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_level(LogLevel::Info)
    }

    pub(crate) fn with_level(level: LogLevel) -> Arc<Self> {
        Arc::new(Self {
            logger: RecordingLogger::new(level),
            buffers: BufferPool::new(256, 4),
            outputs: Mutex::new(vec![]),
            sends: AtomicUsize::new(0),
            disposed: AtomicUsize::new(0),
        })
    }

    pub(crate) fn request(&self, url: &str) -> Arc<HttpRequest> {
        Arc::new(crate::http::tests::request(http_types::Method::Get, url))
    }

    pub(crate) fn output_bytes(&self, n: usize) -> Vec<u8> {
        self.outputs.lock().unwrap()[n].clone()
    }

    pub(crate) fn output(&self, n: usize) -> String {
        String::from_utf8(self.output_bytes(n)).unwrap()
    }

    pub(crate) fn num_outputs(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }

    pub(crate) fn num_sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub(crate) fn num_disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Session for CaptureSession {
    fn send(&self, response: Arc<Response>) {
        self.sends.fetch_add(1, Ordering::SeqCst);

        let mut buf = self.buffers.acquire();
        if response.write(&mut buf) {
            self.outputs.lock().unwrap().push(buf.as_bytes().to_vec());
        }
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }

    fn logger(&self) -> &dyn Logger {
        &self.logger
    }
}

/// Split a serialized response at the blank line ending the header block.
pub(crate) fn split_response(output: &str) -> (String, String) {
    match output.split_once("\r\n\r\n") {
        Some((head, body)) => (head.to_string(), body.to_string()),
        None => (output.to_string(), String::new()),
    }
}
