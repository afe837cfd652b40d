//! The per-request transaction state machine.
//!
//! One transaction covers one request/response cycle: read the request line
//! and headers, build the request, hand it to the handler, drain or truncate
//! the request body as keep-alive requires, finalize the response body and
//! decide whether the connection loops or closes.
//!
//! Misuse after `respond` or `hijack` is poisoned through an `InvalidState`
//! sentinel held in the transaction; both the read and write paths check it
//! on entry.

use crate::{
    errors::{Error, IoError},
    http::{
        headers::{header, HeaderMap},
        request::Request,
        types::{protocol_version, status, PROTOCOL_VERSION_10, PROTOCOL_VERSION_11},
        url::Url,
    },
    server::{
        body::{ChunkedBody, IdentityBody, NullBody, ResponseBody, RESPONSE_BUFFER_SIZE},
        connection::Conn,
        server_impl::{LogRecord, ServerConfig},
        stream::{with_deadline, ByteStream, BoxStream},
    },
};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::io;
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

static REQUEST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([_A-Za-z0-9]+) ([^ ]+) HTTP/([0-9]+)\.([0-9]+)[\r\n ]+$")
        .expect("request line pattern")
});

/// A filter applied to the status and headers when the response is
/// committed. Registered by middleware through
/// [`Transaction::filter_respond`].
pub type RespondFilter = Box<dyn FnMut(u16, HeaderMap) -> (u16, HeaderMap) + Send>;

enum EncoderKind {
    Null,
    Chunked,
    Identity(i64),
}

/// One request/response cycle on one connection.
///
/// The handler reads the request through [`Transaction::req`] and the body
/// methods, then commits a response exactly once with
/// [`Transaction::respond`] followed by [`Transaction::write`] and
/// [`Transaction::flush`], or takes over the stream with
/// [`Transaction::hijack`]. A handler that returns without responding gets a
/// default empty `200 OK`.
pub struct Transaction<'c> {
    cfg: &'c ServerConfig,
    conn: &'c mut Conn,

    /// The parsed request.
    pub req: Request,

    body: Option<ResponseBody>,
    filters: Vec<RespondFilter>,

    chunked_request: bool,
    /// Bytes left in the current body window; -1 means unbounded.
    request_avail: i64,
    request_consumed: bool,
    request_err: Option<Error>,
    write_100_continue: bool,

    respond_called: bool,
    hijacked: bool,
    close_after_response: bool,
    response_err: Option<Error>,

    status: u16,
    resp_header: HeaderMap,
    header_size: usize,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(cfg: &'c ServerConfig, conn: &'c mut Conn) -> Transaction<'c> {
        Transaction {
            cfg,
            conn,
            req: Request::empty(),
            body: None,
            filters: Vec::new(),
            chunked_request: false,
            request_avail: 0,
            request_consumed: false,
            request_err: None,
            write_100_continue: false,
            respond_called: false,
            hijacked: false,
            close_after_response: false,
            response_err: None,
            status: 0,
            resp_header: HeaderMap::new(),
            header_size: 0,
        }
    }

    #[inline]
    pub(crate) fn hijacked(&self) -> bool {
        self.hijacked
    }

    #[inline]
    pub(crate) fn close_after_response(&self) -> bool {
        self.close_after_response
    }

    // PREPARE

    /// Reads the request line and header block and binds the body reader.
    pub(crate) async fn prepare(&mut self) -> Result<(), Error> {
        let rt = self.cfg.read_timeout;
        let (method, raw_url, version) = {
            let conn = &mut *self.conn;
            let stream = conn.stream.as_mut().ok_or(Error::InvalidState)?;
            let line = with_deadline(rt, conn.rdbuf.read_line(&mut **stream)).await?;
            let caps = REQUEST_LINE.captures(line).ok_or(Error::BadRequestLine)?;
            let major = parse_decimal(&caps[3]).ok_or(Error::BadRequestLine)?;
            let minor = parse_decimal(&caps[4]).ok_or(Error::BadRequestLine)?;
            (
                String::from_utf8_lossy(&caps[1]).into_owned(),
                String::from_utf8_lossy(&caps[2]).into_owned(),
                protocol_version(major, minor),
            )
        };

        let header = {
            let conn = &mut *self.conn;
            let stream = conn.stream.as_mut().ok_or(Error::InvalidState)?;
            with_deadline(rt, HeaderMap::parse_block(&mut conn.rdbuf, &mut **stream)).await?
        };

        let mut url = Url::parse(&raw_url).map_err(|_| Error::BadRequestLine)?;
        if url.host.is_empty() {
            url.host = header.get(header::HOST).to_string();
            if url.host.is_empty() {
                url.host = self.cfg.default_host.clone();
            }
        }
        url.scheme = if self.cfg.secure { "https" } else { "http" }.to_string();

        self.req = Request::new(&self.conn.remote_addr, &method, url, version, header)?;

        let expect = self.req.header.get(header::EXPECT);
        self.write_100_continue = expect.eq_ignore_ascii_case("100-continue");

        let connection = self.req.header.get_list(header::CONNECTION);
        let has_token = |token: &str| connection.iter().any(|s| s.eq_ignore_ascii_case(token));
        if version >= PROTOCOL_VERSION_11 {
            self.close_after_response = has_token("close");
        } else if version == PROTOCOL_VERSION_10 && self.req.content_length >= 0 {
            self.close_after_response = !has_token("keep-alive");
        } else {
            self.close_after_response = true;
        }

        let te = self.req.header.get_list(header::TRANSFER_ENCODING);
        let chunked = te.first().is_some_and(|s| s.eq_ignore_ascii_case("chunked"));

        if self.req.method == "GET" || self.req.method == "HEAD" {
            self.request_consumed = true;
        } else if chunked {
            self.chunked_request = true;
        } else if self.req.content_length >= 0 {
            self.request_avail = self.req.content_length;
            self.request_consumed = self.req.content_length == 0;
        } else {
            self.request_avail = -1;
            self.close_after_response = true;
        }

        Ok(())
    }

    // REQUEST BODY

    /// Reads up to `p.len()` bytes of the request body, returning 0 at the
    /// end of the body. Reading after `respond` or `hijack` fails with
    /// `InvalidState`.
    pub async fn read_body(&mut self, p: &mut [u8]) -> Result<usize, Error> {
        if p.is_empty() {
            return Ok(0);
        }
        let result = if self.chunked_request {
            self.read_chunked(p).await
        } else {
            self.read_identity(p).await
        };
        match result {
            Err(Error::Eof) => Ok(0),
            other => other,
        }
    }

    // On the first byte demanded from the body, the 100-continue interim
    // response goes out if the client asked for it.
    async fn check_read(&mut self) -> Result<(), Error> {
        if let Some(err) = &self.request_err {
            if matches!(err, Error::InvalidState) {
                warn!("request body read after respond or hijack");
            }
            return Err(err.clone());
        }
        if self.write_100_continue {
            self.write_100_continue = false;
            let wt = self.cfg.write_timeout;
            let stream = self.conn.stream.as_mut().ok_or(Error::InvalidState)?;
            with_deadline::<_, Error, _>(wt, async {
                stream
                    .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
                    .await
                    .map_err(Error::from)
            })
            .await?;
        }
        Ok(())
    }

    async fn read_identity(&mut self, p: &mut [u8]) -> Result<usize, Error> {
        self.check_read().await?;
        if self.request_avail == 0 {
            self.request_err = Some(Error::Eof);
            return Err(Error::Eof);
        }
        let want = if self.request_avail < 0 {
            p.len()
        } else {
            p.len().min(self.request_avail as usize)
        };
        let n = match self.stream_read(p, want).await {
            Ok(n) => n,
            Err(e) => {
                self.request_err = Some(e.clone());
                return Err(e);
            }
        };
        if n == 0 {
            if self.request_avail < 0 {
                // Unbounded body: stream end is the end of the body.
                self.request_consumed = true;
                self.request_err = Some(Error::Eof);
                return Err(Error::Eof);
            }
            let e = Error::Io(IoError(io::ErrorKind::UnexpectedEof.into()));
            self.request_err = Some(e.clone());
            return Err(e);
        }
        if self.request_avail > 0 {
            self.request_avail -= n as i64;
            if self.request_avail == 0 {
                self.request_consumed = true;
            }
        }
        Ok(n)
    }

    async fn read_chunked(&mut self, p: &mut [u8]) -> Result<usize, Error> {
        self.check_read().await?;
        if self.request_avail == 0 {
            // The first chunk header is read only once body bytes are
            // demanded, after any 100-continue went out.
            match self.read_chunk_framing(true).await {
                Ok(n) => self.request_avail = n,
                Err(e) => {
                    if matches!(e, Error::Eof) {
                        self.request_consumed = true;
                    }
                    self.request_err = Some(e.clone());
                    return Err(e);
                }
            }
        }
        let want = p.len().min(self.request_avail as usize);
        let n = match self.stream_read(p, want).await {
            Ok(n) if n > 0 => n,
            Ok(_) => {
                let e = Error::Io(IoError(io::ErrorKind::UnexpectedEof.into()));
                self.request_err = Some(e.clone());
                return Err(e);
            }
            Err(e) => {
                self.request_err = Some(e.clone());
                return Err(e);
            }
        };
        self.request_avail -= n as i64;
        if self.request_avail == 0 {
            // Read the next chunk header eagerly so the whole body encoding,
            // terminator included, is consumed when the handler reads
            // exactly the advertised length.
            match self.read_chunk_framing(false).await {
                Ok(m) => self.request_avail = m,
                Err(e) => {
                    if matches!(e, Error::Eof) {
                        self.request_consumed = true;
                    }
                    self.request_err = Some(e);
                }
            }
        }
        Ok(n)
    }

    async fn stream_read(&mut self, p: &mut [u8], want: usize) -> Result<usize, Error> {
        let rt = self.cfg.read_timeout;
        let conn = &mut *self.conn;
        let stream = conn.stream.as_mut().ok_or(Error::InvalidState)?;
        with_deadline::<_, Error, _>(rt, async {
            conn.rdbuf
                .read(&mut **stream, &mut p[..want])
                .await
                .map_err(Error::from)
        })
        .await
    }

    /// Reads one chunk framing line. `Err(Eof)` reports that the zero-size
    /// terminator and its trailer lines were fully consumed.
    async fn read_chunk_framing(&mut self, first: bool) -> Result<i64, Error> {
        let rt = self.cfg.read_timeout;
        let conn = &mut *self.conn;
        let stream = conn.stream.as_mut().ok_or(Error::InvalidState)?;
        let rd = &mut conn.rdbuf;

        if !first {
            let mut sep = [0u8; 2];
            with_deadline::<_, Error, _>(rt, async {
                rd.read_exact(&mut **stream, &mut sep)
                    .await
                    .map_err(Error::from)
            })
            .await?;
            if &sep != b"\r\n" {
                return Err(Error::BadFormat);
            }
        }

        let line = match with_deadline(rt, rd.read_line(&mut **stream)).await {
            // The stream ending inside the body framing is never clean.
            Err(Error::Eof) => {
                return Err(Error::Io(IoError(io::ErrorKind::UnexpectedEof.into())))
            }
            other => other?,
        };
        let line = trim_line(line);
        let size = std::str::from_utf8(line)
            .ok()
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .ok_or(Error::BadFormat)?;

        if size == 0 {
            // Trailer lines, terminated by an empty line.
            loop {
                let line = match with_deadline(rt, rd.read_line(&mut **stream)).await {
                    Err(Error::Eof) => {
                        return Err(Error::Io(IoError(io::ErrorKind::UnexpectedEof.into())))
                    }
                    other => other?,
                };
                if trim_line(line).is_empty() {
                    return Err(Error::Eof);
                }
            }
        }
        Ok(size as i64)
    }

    // RESPONSE

    /// Commits status and headers and selects the response-body encoder.
    ///
    /// Only the first call takes effect; later calls (or a call after
    /// `hijack`) are logged and ignored. The core alone decides transfer
    /// encoding: any `Transfer-Encoding` supplied by the handler is
    /// stripped.
    pub async fn respond(&mut self, status_code: u16, header: HeaderMap) {
        if self.hijacked {
            warn!("respond called on hijacked connection");
            return;
        }
        if self.respond_called {
            warn!("multiple calls to respond");
            return;
        }
        self.respond_called = true;
        self.request_err = Some(Error::InvalidState);

        let mut status_code = status_code;
        let mut header = header;
        let mut filters = std::mem::take(&mut self.filters);
        for f in filters.iter_mut() {
            (status_code, header) = f(status_code, header);
        }
        self.status = status_code;

        if !header.get(header::TRANSFER_ENCODING).is_empty() {
            warn!("transfer encoding supplied by handler; stripped");
            header.remove(header::TRANSFER_ENCODING);
        }

        if !self.request_consumed {
            self.close_after_response = true;
        }

        let mut chunked = true;
        let mut content_length: i64 = -1;

        if status_code == status::NOT_MODIFIED {
            header.remove(header::CONTENT_TYPE);
            header.remove(header::CONTENT_LENGTH);
            chunked = false;
        } else {
            let s = header.get(header::CONTENT_LENGTH);
            if !s.is_empty() {
                content_length = s.parse().unwrap_or(-1);
                chunked = false;
            } else if self.req.protocol_version < PROTOCOL_VERSION_11 {
                self.close_after_response = true;
            }
        }

        if self.close_after_response {
            header.set(header::CONNECTION, "close");
            chunked = false;
        }

        if self.req.method == "HEAD" {
            chunked = false;
        }

        if chunked {
            header.set(header::TRANSFER_ENCODING, "chunked");
        }

        let proto = if self.req.protocol_version >= PROTOCOL_VERSION_11 {
            "HTTP/1.1"
        } else {
            "HTTP/1.0"
        };
        let mut prelude = format!(
            "{} {} {}\r\n",
            proto,
            status_code,
            status::status_text(status_code)
        )
        .into_bytes();
        header.write_block(&mut prelude);
        self.header_size = prelude.len();

        let kind = if self.req.method == "HEAD" {
            EncoderKind::Null
        } else if chunked {
            EncoderKind::Chunked
        } else {
            EncoderKind::Identity(content_length)
        };

        let wt = self.cfg.write_timeout;
        let Some(stream) = self.conn.stream.as_mut() else {
            self.response_err = Some(Error::InvalidState);
            return;
        };
        let body = match wt {
            Some(d) => {
                match tokio::time::timeout(d, build_encoder(&mut **stream, &prelude, kind)).await {
                    Ok(body) => body,
                    Err(_) => {
                        self.response_err = Some(Error::from(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "stream deadline exceeded",
                        )));
                        ResponseBody::Null(NullBody::poisoned())
                    }
                }
            }
            None => build_encoder(&mut **stream, &prelude, kind).await,
        };
        self.body = Some(body);
        self.resp_header = header;
    }

    /// Writes response body bytes. Valid only after `respond`.
    pub async fn write(&mut self, p: &[u8]) -> Result<usize, Error> {
        if let Some(e) = &self.response_err {
            return Err(e.clone());
        }
        let wt = self.cfg.write_timeout;
        let conn = &mut *self.conn;
        let (Some(stream), Some(body)) = (conn.stream.as_mut(), self.body.as_mut()) else {
            return Err(Error::InvalidState);
        };
        with_deadline(wt, body.write(&mut **stream, p)).await
    }

    /// Flushes buffered response bytes to the stream.
    pub async fn flush(&mut self) -> Result<(), Error> {
        if let Some(e) = &self.response_err {
            return Err(e.clone());
        }
        let wt = self.cfg.write_timeout;
        let conn = &mut *self.conn;
        let (Some(stream), Some(body)) = (conn.stream.as_mut(), self.body.as_mut()) else {
            return Err(Error::InvalidState);
        };
        with_deadline(wt, body.flush(&mut **stream)).await
    }

    /// Takes over the underlying stream, bypassing HTTP framing for the
    /// rest of the connection's lifetime. Valid only before `respond`.
    ///
    /// Returns the stream and any bytes the server had already buffered.
    /// The caller owns the stream and must close it.
    pub fn hijack(&mut self) -> Result<(BoxStream, Vec<u8>), Error> {
        if self.respond_called || self.hijacked {
            return Err(Error::InvalidState);
        }
        let stream = self.conn.stream.take().ok_or(Error::InvalidState)?;
        let buffered = self.conn.rdbuf.take_buffered();
        self.hijacked = true;
        self.request_err = Some(Error::InvalidState);
        self.response_err = Some(Error::InvalidState);

        if let Some(logger) = &self.cfg.logger {
            logger.log(&LogRecord {
                method: self.req.method.clone(),
                url: self.req.url.to_string(),
                status: 0,
                header: HeaderMap::new(),
                header_size: 0,
                written: 0,
                hijacked: true,
                error: None,
            });
        }

        Ok((stream, buffered))
    }

    /// Registers a filter applied to the status and headers when the
    /// response is committed. Intended for middleware.
    pub fn filter_respond<F>(&mut self, filter: F)
    where
        F: FnMut(u16, HeaderMap) -> (u16, HeaderMap) + Send + 'static,
    {
        self.filters.push(Box::new(filter));
    }

    // FINISH

    /// Drives the response to its terminator and emits the log record. A
    /// handler that never responded gets a default empty `200 OK`.
    pub(crate) async fn finish(&mut self) {
        if !self.respond_called {
            self.respond(status::OK, HeaderMap::new()).await;
        }

        let mut written = 0;
        if self.response_err.is_none() {
            let wt = self.cfg.write_timeout;
            let conn = &mut *self.conn;
            if let (Some(stream), Some(body)) = (conn.stream.as_mut(), self.body.as_mut()) {
                match with_deadline(wt, body.finish(&mut **stream)).await {
                    Ok(n) => written = n,
                    Err(e) => self.response_err = Some(e),
                }
            }
        }
        if self.response_err.is_some() {
            self.close_after_response = true;
        }

        if let Some(logger) = &self.cfg.logger {
            let error = match &self.response_err {
                Some(Error::InvalidState) | None => match &self.request_err {
                    Some(Error::InvalidState) | Some(Error::Eof) | None => None,
                    Some(e) => Some(e.to_string()),
                },
                Some(e) => Some(e.to_string()),
            };
            logger.log(&LogRecord {
                method: self.req.method.clone(),
                url: self.req.url.to_string(),
                status: self.status,
                header: self.resp_header.clone(),
                header_size: self.header_size,
                written,
                hijacked: false,
                error,
            });
        }
    }

    // CONVENIENCE

    /// Responds through the request's error handler, or through the default
    /// error responder if middleware installed none.
    pub async fn error(&mut self, status_code: u16, reason: Option<Error>, header: HeaderMap) {
        if let Some(handler) = self.req.error_handler.clone() {
            handler(self, status_code, reason, header).await;
        } else {
            default_error_handler(self, status_code, reason, header).await;
        }
    }

    /// Responds with a redirect to the given URL.
    pub async fn redirect(&mut self, url: &str, permanent: bool) {
        let status_code = if permanent {
            status::MOVED_PERMANENTLY
        } else {
            status::FOUND
        };
        let mut header = HeaderMap::new();
        header.set(header::LOCATION, url);
        self.respond(status_code, header).await;
    }

    /// Reads the whole request body. A negative `max_len` means no limit;
    /// a longer body yields `RequestEntityTooLarge`.
    pub async fn body_bytes(&mut self, max_len: i64) -> Result<Vec<u8>, Error> {
        let max_len = if max_len < 0 { i64::MAX } else { max_len };
        if self.req.content_length == 0 {
            return Ok(Vec::new());
        }
        if self.req.content_length > max_len {
            return Err(Error::RequestEntityTooLarge);
        }
        let mut p = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read_body(&mut chunk).await?;
            if n == 0 {
                return Ok(p);
            }
            p.extend_from_slice(&chunk[..n]);
            if p.len() as i64 > max_len {
                return Err(Error::RequestEntityTooLarge);
            }
        }
    }

    /// Parses a URL-encoded form body into the request parameter map.
    /// Idempotent; parsing state is kept in the request extension map.
    pub async fn parse_form(&mut self, max_request_body_len: i64) -> Result<(), Error> {
        const FORM_PARSED: &str = "twister.form_parsed";
        if self.req.env.contains_key(FORM_PARSED)
            || self.req.content_type != "application/x-www-form-urlencoded"
            || self.req.content_length == 0
            || (self.req.method != "POST" && self.req.method != "PUT")
        {
            return Ok(());
        }
        self.req.env.insert(FORM_PARSED.to_string(), Box::new(true));
        let mut p = self.body_bytes(max_request_body_len).await?;
        self.req.param.parse_form_encoded(&mut p)
    }
}

/// The default error responder: a `text/plain; charset=utf-8` body equal to
/// the status's reason phrase. Server errors and explicit reasons are
/// logged.
pub async fn default_error_handler(
    txn: &mut Transaction<'_>,
    status_code: u16,
    reason: Option<Error>,
    mut header: HeaderMap,
) {
    header.set(header::CONTENT_TYPE, "text/plain; charset=utf-8");
    if reason.is_some() || status_code >= 500 {
        error!(url = %txn.req.url, status = status_code, ?reason, "request error");
    }
    txn.respond(status_code, header).await;
    let _ = txn
        .write(status::status_text(status_code).as_bytes())
        .await;
}

async fn build_encoder(
    stream: &mut (dyn ByteStream),
    prelude: &[u8],
    kind: EncoderKind,
) -> ResponseBody {
    match kind {
        EncoderKind::Null => ResponseBody::Null(NullBody::new(stream, prelude).await),
        EncoderKind::Chunked => {
            ResponseBody::Chunked(ChunkedBody::new(stream, prelude, RESPONSE_BUFFER_SIZE).await)
        }
        EncoderKind::Identity(content_length) => ResponseBody::Identity(
            IdentityBody::new(stream, prelude, RESPONSE_BUFFER_SIZE, content_length).await,
        ),
    }
}

fn parse_decimal(b: &[u8]) -> Option<i32> {
    std::str::from_utf8(b).ok()?.parse().ok()
}

fn trim_line(line: &[u8]) -> &[u8] {
    if line.ends_with(b"\r\n") {
        &line[..line.len() - 2]
    } else if line.ends_with(b"\n") {
        &line[..line.len() - 1]
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn transaction_over(
        input: &[u8],
    ) -> (tokio::io::DuplexStream, ServerConfig, Conn) {
        let (mut client, server) = duplex(16 * 1024);
        client.write_all(input).await.unwrap();
        let conn = Conn::new(Box::new(server), "test".to_string());
        (client, ServerConfig::default(), conn)
    }

    #[tokio::test]
    async fn body_read_after_respond_is_invalid() {
        let (_client, cfg, mut conn) =
            transaction_over(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello").await;
        let mut txn = Transaction::new(&cfg, &mut conn);
        txn.prepare().await.unwrap();
        assert_eq!(txn.req.content_length, 5);

        let mut p = [0u8; 2];
        assert_eq!(txn.read_body(&mut p).await.unwrap(), 2);
        assert_eq!(&p, b"he");

        txn.respond(status::OK, HeaderMap::new()).await;
        assert_eq!(txn.read_body(&mut p).await, Err(Error::InvalidState));
        // The body was not fully consumed, so the connection must close.
        assert!(txn.close_after_response());
    }

    #[tokio::test]
    async fn bounded_body_reads_exactly_the_declared_length() {
        let (_client, cfg, mut conn) =
            transaction_over(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloMORE").await;
        let mut txn = Transaction::new(&cfg, &mut conn);
        txn.prepare().await.unwrap();

        let body = txn.body_bytes(-1).await.unwrap();
        assert_eq!(body, b"hello");
        let mut p = [0u8; 8];
        assert_eq!(txn.read_body(&mut p).await.unwrap(), 0);

        txn.respond(status::OK, HeaderMap::new()).await;
        assert!(!txn.close_after_response());
    }

    #[tokio::test]
    async fn hijack_returns_stream_and_buffered_bytes() {
        let (_client, cfg, mut conn) =
            transaction_over(b"GET /h HTTP/1.1\r\n\r\nEXTRA").await;
        let mut txn = Transaction::new(&cfg, &mut conn);
        txn.prepare().await.unwrap();

        let (stream, buffered) = txn.hijack().unwrap();
        assert_eq!(buffered, b"EXTRA");
        assert!(txn.hijacked());

        assert_eq!(txn.hijack().err(), Some(Error::InvalidState));
        let mut p = [0u8; 1];
        assert_eq!(txn.read_body(&mut p).await, Err(Error::InvalidState));
        assert_eq!(txn.write(b"x").await, Err(Error::InvalidState));
        drop(stream);
    }

    #[tokio::test]
    async fn hijack_after_respond_is_invalid() {
        let (_client, cfg, mut conn) = transaction_over(b"GET / HTTP/1.1\r\n\r\n").await;
        let mut txn = Transaction::new(&cfg, &mut conn);
        txn.prepare().await.unwrap();
        txn.respond(status::OK, HeaderMap::new()).await;
        assert_eq!(txn.hijack().err(), Some(Error::InvalidState));
    }

    #[test]
    fn request_line_pattern() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n",          true),
            ("GET / HTTP/1.0\n",            true),
            ("POST /a?b=c HTTP/1.1\r\n",    true),
            ("WEIRD_1 /x HTTP/12.3\r\n",    true),
            ("GET  / HTTP/1.1\r\n",         false),
            ("GET / HTTP/1.1",              false),
            ("GET / HTTP/1.\r\n",           false),
            ("GET / http/1.1\r\n",          false),
            ("GET/ HTTP/1.1\r\n",           false),
            ("\r\n",                        false),
        ];

        for (line, ok) in cases {
            assert_eq!(
                REQUEST_LINE.is_match(line.as_bytes()),
                ok,
                "{:?}",
                line
            );
        }
    }

    #[test]
    fn line_trimming() {
        assert_eq!(trim_line(b"abc\r\n"), b"abc");
        assert_eq!(trim_line(b"abc\n"), b"abc");
        assert_eq!(trim_line(b"abc"), b"abc");
        assert_eq!(trim_line(b"\r\n"), b"");
    }
}
