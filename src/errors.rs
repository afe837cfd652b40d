use std::{error, fmt, io};

/// Error kinds produced by the protocol core.
///
/// Framing and parse errors terminate the connection; `InvalidState` marks
/// use of a transaction after `respond` or `hijack`; `ShortWrite`/`LongWrite`
/// report a mismatch between a handler's declared `Content-Length` and the
/// bytes it actually wrote.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// Clean end of stream before the next request line.
    Eof,

    LineTooLong,
    HeaderTooLong,
    HeadersTooLong,
    BadHeaderLine,
    BadRequestLine,

    /// Bad percent encoding or bad chunked framing.
    BadFormat,
    RequestEntityTooLarge,

    /// Use of a transaction object after `respond` or `hijack`.
    InvalidState,

    /// Handler wrote fewer bytes than its declared `Content-Length`.
    ShortWrite,
    /// Handler wrote more bytes than its declared `Content-Length`.
    LongWrite,

    /// Signed-value verification failed: bad format, expired, or bad signature.
    VerificationFailed,

    /// XSRF token missing from the request parameters and headers.
    MissingXsrfToken,
    /// XSRF token present but not equal to the cookie token.
    BadXsrfToken,

    /// WebSocket handshake rejected before the connection was hijacked.
    BadHandshake(&'static str),

    Io(IoError),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Eof => write!(f, "end of stream"),
            Error::LineTooLong => write!(f, "HTTP header line too long"),
            Error::HeaderTooLong => write!(f, "HTTP header value too long"),
            Error::HeadersTooLong => write!(f, "too many HTTP headers"),
            Error::BadHeaderLine => write!(f, "could not parse HTTP header line"),
            Error::BadRequestLine => write!(f, "could not parse request line"),
            Error::BadFormat => write!(f, "bad data format"),
            Error::RequestEntityTooLarge => write!(f, "HTTP request entity too large"),
            Error::InvalidState => write!(f, "object in invalid state"),
            Error::ShortWrite => write!(f, "short write by handler"),
            Error::LongWrite => write!(f, "long write by handler"),
            Error::VerificationFailed => write!(f, "verification failed"),
            Error::MissingXsrfToken => write!(f, "missing xsrf token"),
            Error::BadXsrfToken => write!(f, "bad xsrf token"),
            Error::BadHandshake(reason) => write!(f, "websocket handshake failed: {}", reason),
            Error::Io(e) => write!(f, "{}", e.0),
        }
    }
}

// Sticky transaction errors are handed back on every subsequent call, so the
// enum must be clonable even though io::Error is not.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Eof => Error::Eof,
            Error::LineTooLong => Error::LineTooLong,
            Error::HeaderTooLong => Error::HeaderTooLong,
            Error::HeadersTooLong => Error::HeadersTooLong,
            Error::BadHeaderLine => Error::BadHeaderLine,
            Error::BadRequestLine => Error::BadRequestLine,
            Error::BadFormat => Error::BadFormat,
            Error::RequestEntityTooLarge => Error::RequestEntityTooLarge,
            Error::InvalidState => Error::InvalidState,
            Error::ShortWrite => Error::ShortWrite,
            Error::LongWrite => Error::LongWrite,
            Error::VerificationFailed => Error::VerificationFailed,
            Error::MissingXsrfToken => Error::MissingXsrfToken,
            Error::BadXsrfToken => Error::BadXsrfToken,
            Error::BadHandshake(reason) => Error::BadHandshake(reason),
            Error::Io(e) => Error::Io(IoError(io::Error::new(e.0.kind(), e.0.to_string()))),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(IoError(err))
    }
}

#[derive(Debug)]
pub struct IoError(pub(crate) io::Error);

impl IoError {
    /// The kind of the underlying I/O error.
    #[inline]
    pub fn kind(&self) -> io::ErrorKind {
        self.0.kind()
    }
}

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
