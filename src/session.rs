//! Collaborators a [`Response`] talks to while completing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::response::Response;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level {:?}", other)),
        }
    }
}

/// Structured log sink.
///
/// Callers check `enabled` before building tags so disabled levels cost
/// nothing.
pub trait Logger: Send + Sync {
    fn enabled(&self, level: LogLevel) -> bool;

    fn log(&self, level: LogLevel, msg: &str, tags: &[(&'static str, &str)]);
}

/// The connection a response is written to.
pub trait Session: Send + Sync {
    /// Serialize `response` and schedule the bytes for delivery.
    fn send(&self, response: Arc<Response>);

    /// Force-close the connection. Called after a failed write, when the
    /// stream holds a partial response.
    fn dispose(&self);

    fn logger(&self) -> &dyn Logger;
}
