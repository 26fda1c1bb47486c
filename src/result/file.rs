use crate::buffer::OutputBuffer;
use crate::errors::WriteResult;
use crate::http::{HeaderTable, KnownHeader};

const CRLF: &[u8] = b"\r\n";
const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

enum Framing {
    Whole,
    Chunk { last: bool },
}

/// A segment of file content that frames itself.
///
/// A whole block declares its own Content-Length; a chunk block is written in
/// chunked transfer encoding, the last one closing the stream.
pub struct FileBlock {
    data: Vec<u8>,
    content_type: Option<String>,
    framing: Framing,
}

impl FileBlock {
    pub fn whole(data: Vec<u8>) -> Self {
        Self {
            data,
            content_type: None,
            framing: Framing::Whole,
        }
    }

    pub fn chunk(data: Vec<u8>, last: bool) -> Self {
        Self {
            data,
            content_type: None,
            framing: Framing::Chunk { last },
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn apply_headers(&self, headers: &mut HeaderTable) {
        if let Some(ref content_type) = self.content_type {
            headers.set(KnownHeader::ContentType, content_type.as_str());
        }

        match self.framing {
            Framing::Whole => {
                headers.remove(KnownHeader::TransferEncoding);
                headers.set(KnownHeader::ContentLength, self.data.len().to_string());
            }
            Framing::Chunk { .. } => {
                headers.remove(KnownHeader::ContentLength);
                headers.set(KnownHeader::TransferEncoding, "chunked");
            }
        }
    }

    /// Write the block body. Also used on its own for follow-up chunks that
    /// go out without a header.
    pub fn write(&self, out: &mut OutputBuffer) -> WriteResult {
        match self.framing {
            Framing::Whole => out.write_bytes(&self.data),
            Framing::Chunk { last } => {
                if !self.data.is_empty() {
                    out.write_text(&format!("{:x}", self.data.len()));
                    out.write_bytes(CRLF);
                    out.write_bytes(&self.data);
                    out.write_bytes(CRLF);
                }

                if last {
                    out.write_bytes(LAST_CHUNK);
                }
            }
        }

        Ok(())
    }
}
