//! Response-body encoders.
//!
//! The encoder is selected once when the response is committed and exposed
//! to the handler as a single write-and-flush capability: a null sink for
//! HEAD responses, an identity sink enforcing `Content-Length`, and a
//! chunked-transfer sink. A finished or failed encoder is poisoned; further
//! calls return `InvalidState`.

use crate::errors::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Buffer size for response bodies. Also determines the fixed hex-digit
/// width of chunk length prefixes.
pub(crate) const RESPONSE_BUFFER_SIZE: usize = 4096;

pub(crate) enum ResponseBody {
    Null(NullBody),
    Identity(IdentityBody),
    Chunked(ChunkedBody),
}

impl ResponseBody {
    pub(crate) async fn write<W>(&mut self, w: &mut W, p: &[u8]) -> Result<usize, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self {
            ResponseBody::Null(b) => b.write(p),
            ResponseBody::Identity(b) => b.write(w, p).await,
            ResponseBody::Chunked(b) => b.write(w, p).await,
        }
    }

    pub(crate) async fn flush<W>(&mut self, w: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self {
            ResponseBody::Null(b) => b.flush(),
            ResponseBody::Identity(b) => b.flush(w).await,
            ResponseBody::Chunked(b) => b.flush(w).await,
        }
    }

    /// Drives the encoder to its terminator and returns the total bytes
    /// written to the stream, prelude included.
    pub(crate) async fn finish<W>(&mut self, w: &mut W) -> Result<usize, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self {
            ResponseBody::Null(b) => b.finish(),
            ResponseBody::Identity(b) => b.finish(w).await,
            ResponseBody::Chunked(b) => b.finish(w).await,
        }
    }
}

// NULL

/// Emits only the prelude; body writes are accepted and discarded.
pub(crate) struct NullBody {
    err: Option<Error>,
    written: usize,
}

impl NullBody {
    pub(crate) async fn new<W>(w: &mut W, prelude: &[u8]) -> NullBody
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match w.write_all(prelude).await {
            Ok(()) => NullBody {
                err: None,
                written: prelude.len(),
            },
            Err(e) => NullBody {
                err: Some(e.into()),
                written: 0,
            },
        }
    }

    /// A sink whose prelude never reached the stream; every call reports
    /// `InvalidState`.
    pub(crate) fn poisoned() -> NullBody {
        NullBody {
            err: Some(Error::InvalidState),
            written: 0,
        }
    }

    fn write(&mut self, p: &[u8]) -> Result<usize, Error> {
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(p.len()),
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<usize, Error> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        self.err = Some(Error::InvalidState);
        Ok(self.written)
    }
}

// IDENTITY

/// Writes the prelude and then passes body bytes through a fixed-size
/// buffer. When a `Content-Length` is known, writing past it poisons the
/// encoder with `LongWrite` and finishing before it with `ShortWrite`;
/// either way the connection is closed.
pub(crate) struct IdentityBody {
    err: Option<Error>,
    buf: Box<[u8]>,
    n: usize,
    /// Declared Content-Length, or -1 when unknown.
    content_length: i64,
    /// Body bytes accepted from the handler.
    written: usize,
    header_written: usize,
}

impl IdentityBody {
    pub(crate) async fn new<W>(
        w: &mut W,
        prelude: &[u8],
        buffer_size: usize,
        content_length: i64,
    ) -> IdentityBody
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut body = IdentityBody {
            err: None,
            buf: vec![0; buffer_size].into_boxed_slice(),
            n: 0,
            content_length,
            written: 0,
            header_written: 0,
        };
        match w.write_all(prelude).await {
            Ok(()) => body.header_written = prelude.len(),
            Err(e) => body.err = Some(e.into()),
        }
        body
    }

    async fn write_buf<W>(&mut self, w: &mut W)
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.n == 0 {
            return;
        }
        if let Err(e) = w.write_all(&self.buf[..self.n]).await {
            self.err = Some(e.into());
        }
        self.n = 0;
    }

    async fn write<W>(&mut self, w: &mut W, p: &[u8]) -> Result<usize, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        let mut rest = p;
        while !rest.is_empty() {
            if self.n == self.buf.len() {
                self.write_buf(w).await;
                if let Some(e) = &self.err {
                    return Err(e.clone());
                }
            }
            let n = (self.buf.len() - self.n).min(rest.len());
            self.buf[self.n..self.n + n].copy_from_slice(&rest[..n]);
            self.n += n;
            rest = &rest[n..];
        }
        self.written += p.len();
        if self.content_length >= 0 && self.written as i64 > self.content_length {
            self.err = Some(Error::LongWrite);
            return Err(Error::LongWrite);
        }
        Ok(p.len())
    }

    async fn flush<W>(&mut self, w: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        self.write_buf(w).await;
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn finish<W>(&mut self, w: &mut W) -> Result<usize, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        self.write_buf(w).await;
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        if self.content_length >= 0 && (self.written as i64) < self.content_length {
            self.err = Some(Error::ShortWrite);
            return Err(Error::ShortWrite);
        }
        self.err = Some(Error::InvalidState);
        Ok(self.header_written + self.written)
    }
}

// CHUNKED

/// Chunked transfer encoding over one fixed buffer.
///
/// Each chunk is laid out in place as `[len-hex][CRLF][data][CRLF]`:
/// `ndigit + 2` bytes are reserved when a chunk starts and the zero-padded
/// hex length is patched in when the chunk is finalized, so payload bytes
/// are never moved. Every emitted length prefix is exactly `ndigit` hex
/// digits, where `ndigit` is the number of hex digits in the buffer size.
pub(crate) struct ChunkedBody {
    err: Option<Error>,
    buf: Box<[u8]>,
    /// Start of the current chunk in `buf`.
    s: usize,
    /// Current write position in `buf`.
    n: usize,
    ndigit: usize,
    written: usize,
}

impl ChunkedBody {
    pub(crate) async fn new<W>(w: &mut W, prelude: &[u8], buffer_size: usize) -> ChunkedBody
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut ndigit = 0;
        let mut v = buffer_size;
        while v != 0 {
            ndigit += 1;
            v >>= 4;
        }

        let mut body = ChunkedBody {
            err: None,
            buf: vec![0; buffer_size].into_boxed_slice(),
            s: 0,
            n: 0,
            ndigit,
            written: 0,
        };

        if prelude.len() < buffer_size {
            body.buf[..prelude.len()].copy_from_slice(prelude);
            body.n = prelude.len();
        } else {
            match w.write_all(prelude).await {
                Ok(()) => body.written = prelude.len(),
                Err(e) => body.err = Some(e.into()),
            }
        }

        body.s = body.n;
        body.n += body.ndigit + 2;
        body
    }

    async fn write_buf<W>(&mut self, w: &mut W)
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match w.write_all(&self.buf[..self.n]).await {
            Ok(()) => self.written += self.n,
            Err(e) => self.err = Some(e.into()),
        }
    }

    fn finalize_chunk(&mut self) {
        if self.s + self.ndigit + 2 == self.n {
            // The chunk is empty. Reset back to the start of the chunk.
            self.n = self.s;
            return;
        }

        let mut len = self.n - self.s - self.ndigit - 2;

        // CRLF after the data.
        self.buf[self.n] = b'\r';
        self.buf[self.n + 1] = b'\n';
        self.n += 2;

        // CRLF before the data.
        self.buf[self.s + self.ndigit] = b'\r';
        self.buf[self.s + self.ndigit + 1] = b'\n';

        // Length with 0 padding.
        for i in (self.s..self.s + self.ndigit).rev() {
            self.buf[i] = b"0123456789abcdef"[len & 0xf];
            len >>= 4;
        }
    }

    async fn write<W>(&mut self, w: &mut W, p: &[u8]) -> Result<usize, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        let mut nn = 0;
        let mut rest = p;
        while !rest.is_empty() {
            // Reserve two bytes for the CRLF after the data. The position
            // can already sit past the reserve when the prelude nearly
            // filled the buffer.
            if self.buf.len() as isize - self.n as isize <= 2 {
                self.flush(w).await?;
            }
            let n = (self.buf.len() - self.n - 2).min(rest.len());
            self.buf[self.n..self.n + n].copy_from_slice(&rest[..n]);
            self.n += n;
            nn += n;
            rest = &rest[n..];
        }
        Ok(nn)
    }

    async fn flush<W>(&mut self, w: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        self.finalize_chunk();
        if self.n > 0 {
            self.write_buf(w).await;
            if let Some(e) = &self.err {
                return Err(e.clone());
            }
        }
        self.s = 0;
        self.n = self.ndigit + 2;
        Ok(())
    }

    async fn finish<W>(&mut self, w: &mut W) -> Result<usize, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        self.finalize_chunk();
        const LAST: &[u8] = b"0\r\n\r\n";
        if self.n + LAST.len() > self.buf.len() {
            self.write_buf(w).await;
            if let Some(e) = &self.err {
                return Err(e.clone());
            }
            self.n = 0;
        }
        self.buf[self.n..self.n + LAST.len()].copy_from_slice(LAST);
        self.n += LAST.len();
        self.write_buf(w).await;
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        self.err = Some(Error::InvalidState);
        Ok(self.written)
    }
}

#[cfg(test)]
mod chunked_tests {
    use super::*;

    const BUFFER_SIZE: usize = 32;

    fn dots(n: usize) -> String {
        ".".repeat(n)
    }

    // Each case is a prelude size followed by a script of writes (positive)
    // and flushes (-1), with the exact expected bytes on the wire.
    #[tokio::test]
    async fn framing() {
        #[rustfmt::skip]
        let cases: Vec<(Vec<i64>, String)> = vec![
            // Prelude only.
            (vec![10], dots(10) + "0\r\n\r\n"),
            // Prelude one byte smaller than the buffer.
            (vec![31], dots(31) + "0\r\n\r\n"),
            // Prelude size = buffer size.
            (vec![32], dots(32) + "0\r\n\r\n"),
            // Chunk fits in the buffer.
            (vec![0, 26], format!("1a\r\n{}\r\n0\r\n\r\n", dots(26))),
            // Chunk one byte larger than the buffer.
            (vec![0, 27], format!("1a\r\n{}\r\n01\r\n.\r\n0\r\n\r\n", dots(26))),
            // Flush before and after a chunk.
            (vec![10, -1, 10, -1], format!("{}0a\r\n{}\r\n0\r\n\r\n", dots(10), dots(10))),
            // Chunk accumulated over multiple writes.
            (vec![10, -1, 5, 5, -1], format!("{}0a\r\n{}\r\n0\r\n\r\n", dots(10), dots(10))),
            (
                vec![10, -1, 5, -1, 5, -1],
                format!("{}05\r\n{}\r\n05\r\n{}\r\n0\r\n\r\n", dots(10), dots(5), dots(5)),
            ),
        ];

        for (script, expected) in cases {
            let mut out: Vec<u8> = Vec::new();
            let prelude = dots(script[0] as usize);
            let mut w = ChunkedBody::new(&mut out, prelude.as_bytes(), BUFFER_SIZE).await;
            for &step in &script[1..] {
                if step < 0 {
                    w.flush(&mut out).await.unwrap();
                } else {
                    w.write(&mut out, dots(step as usize).as_bytes()).await.unwrap();
                }
            }
            let written = w.finish(&mut out).await.unwrap();
            assert_eq!(written, expected.len(), "script {:?}", script);
            assert_eq!(String::from_utf8_lossy(&out), expected, "script {:?}", script);
        }
    }

    #[tokio::test]
    async fn write_larger_than_buffer() {
        let mut out: Vec<u8> = Vec::new();
        let mut w = ChunkedBody::new(&mut out, b"", BUFFER_SIZE).await;
        w.write(&mut out, dots(100).as_bytes()).await.unwrap();
        w.finish(&mut out).await.unwrap();

        let s = String::from_utf8_lossy(&out);
        assert!(s.ends_with("0\r\n\r\n"), "{}", s);
        let payload: usize = s
            .split("\r\n")
            .step_by(2)
            .map_while(|len| usize::from_str_radix(len, 16).ok())
            .sum();
        assert_eq!(payload, 100, "{}", s);
    }

    #[tokio::test]
    async fn empty_flush_emits_no_chunk() {
        let mut out: Vec<u8> = Vec::new();
        let mut w = ChunkedBody::new(&mut out, b"H", BUFFER_SIZE).await;
        w.flush(&mut out).await.unwrap();
        w.flush(&mut out).await.unwrap();
        w.finish(&mut out).await.unwrap();
        assert_eq!(out, b"H0\r\n\r\n");
    }

    #[tokio::test]
    async fn finish_poisons() {
        let mut out: Vec<u8> = Vec::new();
        let mut w = ChunkedBody::new(&mut out, b"", BUFFER_SIZE).await;
        w.finish(&mut out).await.unwrap();
        assert_eq!(w.write(&mut out, b"x").await, Err(Error::InvalidState));
        assert_eq!(w.finish(&mut out).await, Err(Error::InvalidState));
    }

    #[test]
    fn ndigit_matches_buffer_size() {
        for (size, expected) in [(16usize, 2usize), (32, 2), (255, 2), (256, 3), (4096, 4)] {
            let mut ndigit = 0;
            let mut v = size;
            while v != 0 {
                ndigit += 1;
                v >>= 4;
            }
            assert_eq!(ndigit, expected, "buffer size {}", size);
        }
    }
}

#[cfg(test)]
mod identity_tests {
    use super::*;

    #[tokio::test]
    async fn bounded_exact() {
        let mut out: Vec<u8> = Vec::new();
        let mut w = IdentityBody::new(&mut out, b"HDR", 8, 5).await;
        w.write(&mut out, b"Hel").await.unwrap();
        w.write(&mut out, b"lo").await.unwrap();
        let written = w.finish(&mut out).await.unwrap();
        assert_eq!(out, b"HDRHello");
        assert_eq!(written, 8);
    }

    #[tokio::test]
    async fn long_write_poisons() {
        let mut out: Vec<u8> = Vec::new();
        let mut w = IdentityBody::new(&mut out, b"", 8, 3).await;
        assert_eq!(w.write(&mut out, b"toolong").await, Err(Error::LongWrite));
        assert_eq!(w.finish(&mut out).await, Err(Error::LongWrite));
        // Error reporting is idempotent.
        assert_eq!(w.finish(&mut out).await, Err(Error::LongWrite));
    }

    #[tokio::test]
    async fn short_write_detected_on_finish() {
        let mut out: Vec<u8> = Vec::new();
        let mut w = IdentityBody::new(&mut out, b"", 8, 5).await;
        w.write(&mut out, b"Hi").await.unwrap();
        assert_eq!(w.finish(&mut out).await, Err(Error::ShortWrite));
        // The partial body still reached the stream before the error.
        assert_eq!(out, b"Hi");
    }

    #[tokio::test]
    async fn unbounded_passes_bytes_through() {
        let mut out: Vec<u8> = Vec::new();
        let mut w = IdentityBody::new(&mut out, b"", 4, -1).await;
        w.write(&mut out, b"larger than the buffer").await.unwrap();
        let written = w.finish(&mut out).await.unwrap();
        assert_eq!(out, b"larger than the buffer");
        assert_eq!(written, 22);
    }
}
