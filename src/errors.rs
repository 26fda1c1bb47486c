use std::fmt;
use std::io;
use std::result;

pub enum RuntimeError {
    Io((&'static str, io::Error)),
    UnknownToken,
}

impl RuntimeError {
    pub fn reason(self) -> String {
        use RuntimeError::*;

        match self {
            Io((reason, err)) => format!("{} - {}", reason, err),
            UnknownToken => "unknown token".to_string(),
        }
    }
}

pub type RuntimeResult = result::Result<(), RuntimeError>;

pub fn fatal_io_error(reason: &'static str, err: io::Error) -> RuntimeError {
    RuntimeError::Io((reason, err))
}

/// Failure reading a request off a client stream.
#[derive(Debug)]
pub enum HttpError {
    Io((&'static str, io::Error)),
    HeaderParse(httparse::Error),
    BadValue(&'static str),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use HttpError::*;

        match self {
            Io((reason, err)) => write!(f, "{} - {}", reason, err),
            HeaderParse(err) => write!(f, "failed to parse http header - {}", err),
            BadValue(reason) => f.write_str(reason),
        }
    }
}

/// Failure while serializing a response into an output buffer.
///
/// Every variant is terminal for the connection: the buffer holds a partial
/// response and must not be handed to the transport.
#[derive(Debug)]
pub enum WriteError {
    Io(io::Error),
    Json(serde_json::Error),
    PlaceholderOverflow { width: usize, needed: usize },
    PlaceholderOutOfRange,
    LengthMismatch { declared: usize, written: usize },
    Body(String),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use WriteError::*;

        match self {
            Io(err) => write!(f, "i/o error writing response - {}", err),
            Json(err) => write!(f, "couldn't encode json body - {}", err),
            PlaceholderOverflow { width, needed } => write!(
                f,
                "placeholder of {} bytes can't hold {} bytes",
                width, needed
            ),
            PlaceholderOutOfRange => write!(f, "placeholder outside of buffer"),
            LengthMismatch { declared, written } => write!(
                f,
                "body declared {} bytes but writer emitted {}",
                declared, written
            ),
            Body(reason) => write!(f, "body writer failed - {}", reason),
        }
    }
}

impl std::error::Error for WriteError {}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        WriteError::Io(err)
    }
}

impl From<serde_json::Error> for WriteError {
    fn from(err: serde_json::Error) -> Self {
        WriteError::Json(err)
    }
}

pub type WriteResult<T = ()> = result::Result<T, WriteError>;
