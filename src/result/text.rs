use crate::buffer::OutputBuffer;
use crate::errors::WriteResult;
use crate::http::{HeaderTable, KnownHeader};
use crate::response::Response;

use super::ResultValue;

pub struct TextResult {
    text: String,
    content_type: &'static str,
}

impl TextResult {
    pub fn new(text: impl Into<String>, content_type: &'static str) -> Self {
        Self {
            text: text.into(),
            content_type,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, "text/plain; charset=utf-8")
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self::new(text, "text/html; charset=utf-8")
    }
}

impl ResultValue for TextResult {
    fn content_type(&self) -> &str {
        self.content_type
    }

    fn length(&self) -> Option<usize> {
        Some(self.text.len())
    }

    fn write(&self, out: &mut OutputBuffer, _response: &Response) -> WriteResult {
        out.write_text(&self.text);
        Ok(())
    }
}

/// Result with headers only, e.g. for redirects and 204s.
pub struct NoBody {
    content_type: &'static str,
    location: Option<String>,
}

impl NoBody {
    pub fn new() -> Self {
        Self {
            content_type: "text/plain; charset=utf-8",
            location: None,
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Self::new()
        }
    }
}

impl Default for NoBody {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultValue for NoBody {
    fn content_type(&self) -> &str {
        self.content_type
    }

    fn has_body(&self) -> bool {
        false
    }

    fn length(&self) -> Option<usize> {
        Some(0)
    }

    fn apply_headers(&self, headers: &mut HeaderTable) {
        if let Some(ref location) = self.location {
            headers.set(KnownHeader::Location, location.as_str());
        }
    }

    fn write(&self, _out: &mut OutputBuffer, _response: &Response) -> WriteResult {
        Ok(())
    }
}
