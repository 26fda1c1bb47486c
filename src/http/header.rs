//! Ordered response header table.
//!
//! Entries are written in insertion order. Well-known names are kept as a
//! [`KnownHeader`] so their `Name: ` prefix is a static byte string instead of
//! being assembled per write.

use std::fmt;

use crate::buffer::OutputBuffer;

const CRLF: &[u8] = b"\r\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KnownHeader {
    CacheControl,
    Connection,
    ContentLength,
    ContentType,
    Date,
    Location,
    SetCookie,
    TransferEncoding,
}

const KNOWN_HEADERS: [KnownHeader; 8] = [
    KnownHeader::CacheControl,
    KnownHeader::Connection,
    KnownHeader::ContentLength,
    KnownHeader::ContentType,
    KnownHeader::Date,
    KnownHeader::Location,
    KnownHeader::SetCookie,
    KnownHeader::TransferEncoding,
];

impl KnownHeader {
    pub fn as_str(self) -> &'static str {
        use KnownHeader::*;

        match self {
            CacheControl => "Cache-Control",
            Connection => "Connection",
            ContentLength => "Content-Length",
            ContentType => "Content-Type",
            Date => "Date",
            Location => "Location",
            SetCookie => "Set-Cookie",
            TransferEncoding => "Transfer-Encoding",
        }
    }

    /// `Name: ` as written on the wire.
    pub fn prefix(self) -> &'static [u8] {
        use KnownHeader::*;

        match self {
            CacheControl => b"Cache-Control: ",
            Connection => b"Connection: ",
            ContentLength => b"Content-Length: ",
            ContentType => b"Content-Type: ",
            Date => b"Date: ",
            Location => b"Location: ",
            SetCookie => b"Set-Cookie: ",
            TransferEncoding => b"Transfer-Encoding: ",
        }
    }

    fn lookup(name: &str) -> Option<Self> {
        KNOWN_HEADERS
            .iter()
            .copied()
            .find(|h| h.as_str().eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderName {
    Known(KnownHeader),
    Custom(String),
}

impl HeaderName {
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Known(h) => h.as_str(),
            HeaderName::Custom(s) => s,
        }
    }

    fn matches(&self, other: &HeaderName) -> bool {
        match (self, other) {
            (HeaderName::Known(a), HeaderName::Known(b)) => a == b,
            (a, b) => a.as_str().eq_ignore_ascii_case(b.as_str()),
        }
    }

    fn write(&self, out: &mut OutputBuffer) {
        match self {
            HeaderName::Known(h) => out.write_bytes(h.prefix()),
            HeaderName::Custom(s) => {
                out.write_text(s);
                out.write_bytes(b": ");
            }
        }
    }
}

impl From<KnownHeader> for HeaderName {
    fn from(h: KnownHeader) -> Self {
        HeaderName::Known(h)
    }
}

impl From<&str> for HeaderName {
    fn from(name: &str) -> Self {
        match KnownHeader::lookup(name) {
            Some(h) => HeaderName::Known(h),
            None => HeaderName::Custom(name.to_string()),
        }
    }
}

impl From<String> for HeaderName {
    fn from(name: String) -> Self {
        match KnownHeader::lookup(&name) {
            Some(h) => HeaderName::Known(h),
            None => HeaderName::Custom(name),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct HeaderTable {
    entries: Vec<(HeaderName, String)>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to a single value.
    ///
    /// The first existing entry (compared case-insensitively) keeps its
    /// position and takes the new value; any further entries of that name are
    /// removed.
    pub fn set<N, V>(&mut self, name: N, value: V)
    where
        N: Into<HeaderName>,
        V: Into<String>,
    {
        let name = name.into();
        let value = value.into();

        match self.entries.iter().position(|(n, _)| n.matches(&name)) {
            Some(pos) => {
                self.entries[pos].1 = value;

                let mut n = pos + 1;
                while n < self.entries.len() {
                    if self.entries[n].0.matches(&name) {
                        self.entries.remove(n);
                    } else {
                        n += 1;
                    }
                }
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Add another line for `name`, keeping any existing ones.
    pub fn append<N, V>(&mut self, name: N, value: V)
    where
        N: Into<HeaderName>,
        V: Into<String>,
    {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get<N: Into<HeaderName>>(&self, name: N) -> Option<&str> {
        let name = name.into();
        self.entries
            .iter()
            .find(|(n, _)| n.matches(&name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<N: Into<HeaderName>>(&self, name: N) -> Vec<&str> {
        let name = name.into();
        self.entries
            .iter()
            .filter(|(n, _)| n.matches(&name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains<N: Into<HeaderName>>(&self, name: N) -> bool {
        self.get(name).is_some()
    }

    pub fn remove<N: Into<HeaderName>>(&mut self, name: N) {
        let name = name.into();
        self.entries.retain(|(n, _)| !n.matches(&name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// One `Name: Value\r\n` line per entry.
    pub fn write(&self, out: &mut OutputBuffer) {
        for (name, value) in self.entries.iter() {
            name.write(out);
            out.write_text(value);
            out.write_bytes(CRLF);
        }
    }
}

impl fmt::Display for HeaderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{}: {}", name, value)?;
        }

        Ok(())
    }
}
