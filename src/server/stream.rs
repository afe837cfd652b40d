//! Byte stream abstraction.

use std::{future::Future, io, time::Duration};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

/// A bidirectional reliable byte stream. Implemented by every async stream
/// type, most notably `tokio::net::TcpStream` and TLS wrappers around it.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// A boxed byte stream, as handed to handlers by `hijack`.
pub type BoxStream = Box<dyn ByteStream>;

/// Runs an I/O future under an optional deadline. A missed deadline surfaces
/// as a `TimedOut` I/O error, which the transaction treats like any other
/// stream failure.
pub(crate) async fn with_deadline<T, E, F>(deadline: Option<Duration>, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<io::Error>,
{
    match deadline {
        Some(d) => match timeout(d, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "stream deadline exceeded").into()),
        },
        None => fut.await,
    }
}

/// True for accept errors that should be logged and retried rather than
/// stopping the acceptor.
pub(crate) fn is_temporary(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
