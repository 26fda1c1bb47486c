//! Response bodies.
//!
//! A handler hands over a [`Payload`]; [`classify`] turns it into the closed
//! set of [`Body`] shapes the encoder knows how to frame.

use crate::buffer::OutputBuffer;
use crate::errors::WriteResult;
use crate::http::HeaderTable;
use crate::response::Response;

mod file;
mod json;
mod text;

pub use file::FileBlock;
pub use json::{ActionResult, JsonResult};
pub use text::{NoBody, TextResult};

/// Body with its own content type and writer.
pub trait ResultValue: Send + Sync {
    fn content_type(&self) -> &str;

    fn has_body(&self) -> bool {
        true
    }

    /// Exact body length, or `None` when it is only known after writing.
    /// `Some(0)` is treated the same as `None`.
    fn length(&self) -> Option<usize>;

    /// Adjust headers before they are written. Content-Type is already set.
    fn apply_headers(&self, _headers: &mut HeaderTable) {}

    /// Write the body. A panic here is caught by the encoder and handled
    /// like a returned error.
    fn write(&self, out: &mut OutputBuffer, response: &Response) -> WriteResult;
}

pub enum Body {
    Empty,
    File(FileBlock),
    Value(Box<dyn ResultValue>),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// What application code completes a response with.
pub enum Payload {
    File(FileBlock),
    Value(Box<dyn ResultValue>),
    Action(ActionResult),
    /// Any other data; wrapped into an [`ActionResult`] and sent as JSON.
    Data(serde_json::Value),
}

impl Payload {
    pub fn value<R: ResultValue + 'static>(value: R) -> Self {
        Payload::Value(Box::new(value))
    }
}

impl From<FileBlock> for Payload {
    fn from(block: FileBlock) -> Self {
        Payload::File(block)
    }
}

impl From<ActionResult> for Payload {
    fn from(action: ActionResult) -> Self {
        Payload::Action(action)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(data: serde_json::Value) -> Self {
        Payload::Data(data)
    }
}

impl From<TextResult> for Payload {
    fn from(text: TextResult) -> Self {
        Payload::value(text)
    }
}

/// Map a payload onto a body shape. Plain data gets the request's base url
/// and id attached.
pub fn classify(payload: Payload, url: &str, request_id: &str) -> Body {
    match payload {
        Payload::File(block) => Body::File(block),
        Payload::Value(value) => Body::Value(value),
        Payload::Action(action) => Body::Value(Box::new(JsonResult::new(action))),
        Payload::Data(data) => {
            let action = ActionResult {
                url: url.to_string(),
                id: request_id.to_string(),
                ..ActionResult::new(data)
            };

            Body::Value(Box::new(JsonResult::new(action)))
        }
    }
}
