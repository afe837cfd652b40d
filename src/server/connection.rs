//! Buffered stream reading and the per-connection transaction loop.

use crate::{
    errors::{Error, IoError},
    http::headers::MAX_LINE_SIZE,
    server::{
        server_impl::{Handler, ServerInner},
        stream::BoxStream,
        transaction::Transaction,
    },
};
use futures_util::FutureExt;
use memchr::memchr;
use std::{any::Any, backtrace::Backtrace, io, panic::AssertUnwindSafe, sync::Arc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error};

/// A fixed-capacity buffered reader decoupled from the stream it reads, so
/// the stream can be handed off on hijack together with any bytes already
/// buffered.
pub(crate) struct ReadBuffer {
    buf: Box<[u8]>,
    pos: usize,
    cap: usize,
    // Bytes consumed before the stream is read again; seeded from the
    // buffered remainder of a hijacked connection.
    preface: Vec<u8>,
    preface_pos: usize,
}

impl ReadBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> ReadBuffer {
        ReadBuffer {
            buf: vec![0; capacity].into_boxed_slice(),
            pos: 0,
            cap: 0,
            preface: Vec::new(),
            preface_pos: 0,
        }
    }

    pub(crate) fn with_preface(capacity: usize, preface: Vec<u8>) -> ReadBuffer {
        let mut rd = ReadBuffer::with_capacity(capacity);
        rd.preface = preface;
        rd
    }

    /// Unconsumed bytes already pulled off the stream.
    pub(crate) fn take_buffered(&mut self) -> Vec<u8> {
        let mut out = self.buf[self.pos..self.cap].to_vec();
        out.extend_from_slice(&self.preface[self.preface_pos..]);
        self.pos = 0;
        self.cap = 0;
        self.preface.clear();
        self.preface_pos = 0;
        out
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.cap, 0);
            self.cap -= self.pos;
            self.pos = 0;
        }
    }

    // Appends bytes at the write position, draining the preface before
    // touching the stream. The caller guarantees free space.
    async fn fill_some<R>(&mut self, r: &mut R) -> io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.pos == self.cap {
            self.pos = 0;
            self.cap = 0;
        }
        if self.preface_pos < self.preface.len() {
            let n = (self.buf.len() - self.cap).min(self.preface.len() - self.preface_pos);
            self.buf[self.cap..self.cap + n]
                .copy_from_slice(&self.preface[self.preface_pos..self.preface_pos + n]);
            self.preface_pos += n;
            self.cap += n;
            if self.preface_pos == self.preface.len() {
                self.preface.clear();
                self.preface_pos = 0;
            }
            return Ok(n);
        }
        let n = r.read(&mut self.buf[self.cap..]).await?;
        self.cap += n;
        Ok(n)
    }

    /// Reads up to `p.len()` bytes through the buffer.
    pub(crate) async fn read<R>(&mut self, r: &mut R, p: &mut [u8]) -> io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.pos == self.cap {
            let n = self.fill_some(r).await?;
            if n == 0 {
                return Ok(0);
            }
        }
        let n = (self.cap - self.pos).min(p.len());
        p[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    pub(crate) async fn read_exact<R>(&mut self, r: &mut R, p: &mut [u8]) -> io::Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut filled = 0;
        while filled < p.len() {
            let n = self.read(r, &mut p[filled..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(())
    }

    pub(crate) async fn read_byte<R>(&mut self, r: &mut R) -> io::Result<u8>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut b = [0u8; 1];
        self.read_exact(r, &mut b).await?;
        Ok(b[0])
    }

    /// Reads one line including the trailing `\n`. Fails with `LineTooLong`
    /// when a full buffer holds no newline, with `Eof` on a clean end of
    /// stream, and with an unexpected-EOF I/O error when the stream ends
    /// mid-line.
    pub(crate) async fn read_line<R>(&mut self, r: &mut R) -> Result<&[u8], Error>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut scanned = self.pos;
        let (start, end) = loop {
            if let Some(i) = memchr(b'\n', &self.buf[scanned..self.cap]) {
                break (self.pos, scanned + i + 1);
            }
            if self.cap - self.pos >= self.buf.len() {
                return Err(Error::LineTooLong);
            }
            if self.cap == self.buf.len() {
                scanned -= self.pos;
                self.compact();
            } else {
                scanned = self.cap;
            }
            let before = self.pos;
            let n = self.fill_some(r).await?;
            // fill_some resets an empty buffer; keep the scan consistent.
            if self.pos != before {
                scanned = 0;
            }
            if n == 0 {
                return Err(if self.pos == self.cap {
                    Error::Eof
                } else {
                    Error::Io(IoError(io::ErrorKind::UnexpectedEof.into()))
                });
            }
        };
        self.pos = end;
        Ok(&self.buf[start..end])
    }

    /// Reads until `delim` (inclusive) or until the buffer is full. Returns
    /// the bytes and whether the delimiter was found.
    pub(crate) async fn read_slice<R>(&mut self, r: &mut R, delim: u8) -> io::Result<(Vec<u8>, bool)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if let Some(i) = memchr(delim, &self.buf[self.pos..self.cap]) {
                let out = self.buf[self.pos..self.pos + i + 1].to_vec();
                self.pos += i + 1;
                return Ok((out, true));
            }
            if self.cap - self.pos >= self.buf.len() {
                let out = self.buf[self.pos..self.cap].to_vec();
                self.pos = self.cap;
                return Ok((out, false));
            }
            if self.cap == self.buf.len() {
                self.compact();
            }
            let n = self.fill_some(r).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
    }
}

/// Per-connection state: the stream, its remote address label and the
/// buffered reader. The stream is taken out on hijack.
pub(crate) struct Conn {
    pub(crate) stream: Option<BoxStream>,
    pub(crate) remote_addr: String,
    pub(crate) rdbuf: ReadBuffer,
}

impl Conn {
    pub(crate) fn new(stream: BoxStream, remote_addr: String) -> Conn {
        Conn {
            stream: Some(stream),
            remote_addr,
            rdbuf: ReadBuffer::with_capacity(MAX_LINE_SIZE),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Runs transactions on one stream until close-after-response, a fatal
/// error, or a hijack. The stream is closed on drop unless hijacked.
pub(crate) async fn serve_connection<H: Handler>(
    server: Arc<ServerInner<H>>,
    stream: BoxStream,
    remote_addr: String,
) {
    let mut conn = Conn::new(stream, remote_addr);
    loop {
        let mut txn = Transaction::new(&server.config, &mut conn);

        if let Err(err) = txn.prepare().await {
            // A clean EOF between requests is the normal end of a
            // keep-alive connection.
            if !matches!(err, Error::Eof) {
                debug!(error = %err, "request prepare failed");
            }
            break;
        }

        let served: Result<(), Box<dyn Any + Send>> = if server.config.recover_handlers {
            AssertUnwindSafe(server.handler.serve(&mut txn))
                .catch_unwind()
                .await
        } else {
            server.handler.serve(&mut txn).await;
            Ok(())
        };

        if let Err(payload) = served {
            let url = txn.req.url.to_string();
            let backtrace = Backtrace::force_capture();
            error!(
                url = %url,
                panic = panic_message(payload.as_ref()),
                %backtrace,
                "panic while serving request",
            );
            break;
        }

        if txn.hijacked() {
            return;
        }
        txn.finish().await;
        if txn.close_after_response() {
            break;
        }
    }
}
