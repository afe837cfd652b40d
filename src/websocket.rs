//! WebSocket upgrade for the hixie-76 handshake.
//!
//! [`upgrade`] is called from inside an ordinary handler before `respond`.
//! It validates the upgrade headers, hijacks the connection, answers the
//! `Sec-Websocket-Key1`/`Key2`/key3 challenge with an MD5 digest, and
//! returns a [`Conn`] speaking the text framing of that draft: each message
//! is `0x00 payload 0xFF`.

use crate::{
    errors::Error,
    http::{
        headers::{header, HeaderMap},
        types::status,
    },
    server::{connection::ReadBuffer, stream::BoxStream, transaction::Transaction},
};
use md5::{Digest, Md5};
use tokio::io::AsyncWriteExt;

/// A WebSocket connection using the draft text framing.
pub struct Conn {
    stream: BoxStream,
    rd: ReadBuffer,
    write_buf: Vec<u8>,
    has_more: bool,
}

impl Conn {
    /// Reads a message from the client. The message is returned in one or
    /// more chunks; `has_more` is false on the last chunk. A message that
    /// fits in the read buffer given to [`upgrade`] arrives in one chunk.
    pub async fn read_message(&mut self) -> Result<(Vec<u8>, bool), Error> {
        if !self.has_more {
            let b = self.rd.read_byte(&mut *self.stream).await?;
            if b != 0x00 {
                return Err(Error::BadFormat);
            }
        }
        let (mut chunk, found) = self.rd.read_slice(&mut *self.stream, 0xff).await?;
        if found {
            chunk.pop();
        }
        self.has_more = !found;
        Ok((chunk, self.has_more))
    }

    /// Writes a message to the client, framed atomically with a single
    /// flush. The payload cannot contain the bytes 0x00 or 0xFF.
    pub async fn write_message(&mut self, p: &[u8]) -> Result<(), Error> {
        self.write_buf.clear();
        self.write_buf.push(0x00);
        self.write_buf.extend_from_slice(p);
        self.write_buf.push(0xff);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shuts down the underlying stream.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

// Key bytes from one Sec-Websocket-Key header: the decimal digits form a
// 32-bit number that must divide evenly by the space count.
fn websocket_key(req_header: &HeaderMap, name: &str) -> Result<[u8; 4], Error> {
    let s = req_header.get(name);
    if s.is_empty() {
        return Err(Error::BadHandshake("missing key"));
    }
    let mut n: u32 = 0;
    let mut d: u32 = 0;
    for b in s.bytes() {
        if b == b' ' {
            d += 1;
        } else if b.is_ascii_digit() {
            n = n.wrapping_mul(10).wrapping_add(u32::from(b - b'0'));
        }
    }
    if d == 0 || n % d != 0 {
        return Err(Error::BadHandshake("bad key"));
    }
    Ok((n / d).to_be_bytes())
}

/// Upgrades the HTTP connection to the WebSocket protocol. The caller is
/// responsible for closing the returned connection.
///
/// On a malformed handshake an error response is sent through the
/// transaction and the error is returned; the connection stays with the
/// server.
pub async fn upgrade(
    txn: &mut Transaction<'_>,
    read_buf_size: usize,
    write_buf_size: usize,
    extra_header: HeaderMap,
) -> Result<Conn, Error> {
    if txn.req.method != "GET" {
        txn.respond(status::METHOD_NOT_ALLOWED, HeaderMap::new()).await;
        return Err(Error::BadHandshake("bad request method"));
    }

    let origin = txn.req.header.get(header::ORIGIN).to_string();
    if origin.is_empty() {
        txn.respond(status::BAD_REQUEST, HeaderMap::new()).await;
        return Err(Error::BadHandshake("origin missing"));
    }

    if !txn
        .req
        .header
        .get(header::CONNECTION)
        .eq_ignore_ascii_case("upgrade")
    {
        txn.respond(status::BAD_REQUEST, HeaderMap::new()).await;
        return Err(Error::BadHandshake("connection header missing or wrong value"));
    }

    if !txn
        .req
        .header
        .get(header::UPGRADE)
        .eq_ignore_ascii_case("websocket")
    {
        txn.respond(status::BAD_REQUEST, HeaderMap::new()).await;
        return Err(Error::BadHandshake("upgrade header missing or wrong value"));
    }

    let key1 = match websocket_key(&txn.req.header, header::SEC_WEBSOCKET_KEY1) {
        Ok(key) => key,
        Err(e) => {
            txn.respond(status::BAD_REQUEST, HeaderMap::new()).await;
            return Err(e);
        }
    };
    let key2 = match websocket_key(&txn.req.header, header::SEC_WEBSOCKET_KEY2) {
        Ok(key) => key,
        Err(e) => {
            txn.respond(status::BAD_REQUEST, HeaderMap::new()).await;
            return Err(e);
        }
    };

    // The location is rebuilt from the request URL; the scheme follows the
    // connection's security.
    let scheme = if txn.req.url.scheme == "https" { "wss" } else { "ws" };
    let location = format!("{}://{}{}", scheme, txn.req.url.host, txn.req.url.path);
    let protocol = txn
        .req
        .header
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .to_string();

    let (stream, buffered) = txn.hijack()?;
    let mut conn = Conn {
        stream,
        rd: ReadBuffer::with_preface(read_buf_size, buffered),
        write_buf: Vec::with_capacity(write_buf_size),
        has_more: false,
    };

    // The 8 challenge bytes follow the header block.
    let mut key3 = [0u8; 8];
    conn.rd.read_exact(&mut *conn.stream, &mut key3).await?;

    let mut hash = Md5::new();
    hash.update(key1);
    hash.update(key2);
    hash.update(key3);
    let digest = hash.finalize();

    let mut h = extra_header;
    h.set(header::UPGRADE, "WebSocket");
    h.set(header::CONNECTION, "Upgrade");
    h.set("Sec-Websocket-Location", &location);
    h.set("Sec-Websocket-Origin", &origin);
    if !protocol.is_empty() {
        h.set(header::SEC_WEBSOCKET_PROTOCOL, &protocol);
    }

    let mut response = b"HTTP/1.1 101 WebSocket Protocol Handshake\r\n".to_vec();
    h.write_block(&mut response);
    response.extend_from_slice(&digest);

    conn.stream.write_all(&response).await?;
    conn.stream.flush().await?;

    Ok(conn)
}
