//! HTTP response completion and serialization.
//!
//! A [`Response`] is completed exactly once, by whichever of the handler or a
//! deferred path (another thread, a timeout) gets there first, then written
//! to its [`Session`] as an HTTP/1.x message.

pub mod buffer;
pub mod config;
pub mod errors;
pub mod http;
pub mod logger;
pub mod response;
pub mod result;
pub mod server;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{BufferPool, OutputBuffer, Placeholder, PooledBuffer};
pub use errors::{WriteError, WriteResult};
pub use http::HttpRequest;
pub use response::{Response, ResponsePool};
pub use result::{ActionResult, FileBlock, JsonResult, NoBody, Payload, ResultValue, TextResult};
pub use session::{LogLevel, Logger, Session};
