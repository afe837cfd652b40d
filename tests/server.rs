//! End-to-end transaction tests: literal request bytes in, literal response
//! bytes out, over loopback TCP.

use futures_util::future::BoxFuture;
use md5::{Digest, Md5};
use std::{net::SocketAddr, time::Duration};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use twister::{
    header, security, status, websocket, HandlerFunc, HeaderMap, Server, Transaction,
};

// The handler mirrors its query parameters: `cl` sets the response
// Content-Length, `w` writes a body, `panic` panics before or after the
// response is committed. `/chat` upgrades to a WebSocket echo and `/xsrf`
// demands a request-forgery token.
fn test_handler<'a>(txn: &'a mut Transaction<'_>) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        if txn.req.url.path == "/chat" {
            let Ok(mut conn) = websocket::upgrade(txn, 1024, 1024, HeaderMap::new()).await
            else {
                return;
            };
            loop {
                let mut message = Vec::new();
                loop {
                    match conn.read_message().await {
                        Ok((chunk, has_more)) => {
                            message.extend_from_slice(&chunk);
                            if !has_more {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }
                if conn.write_message(&message).await.is_err() {
                    return;
                }
            }
        }

        if txn.req.url.path == "/xsrf" {
            match security::check_xsrf(txn, "xsrf", "xsrf") {
                Ok(()) => txn.respond(status::OK, HeaderMap::new()).await,
                Err(e) => txn.error(status::NOT_FOUND, Some(e), HeaderMap::new()).await,
            }
            return;
        }

        let _ = txn.parse_form(1000).await;

        let panic_at = txn.req.param.get("panic").map(str::to_string);
        if panic_at.as_deref() == Some("before") {
            panic!("before");
        }

        let mut header = HeaderMap::new();
        if let Some(cl) = txn.req.param.get("cl") {
            header.set(header::CONTENT_LENGTH, cl);
        }
        let w = txn.req.param.get("w").map(str::to_string);

        txn.respond(status::OK, header).await;
        if let Some(w) = w {
            let _ = txn.write(w.as_bytes()).await;
        }

        if panic_at.as_deref() == Some("after") {
            panic!("after");
        }
    })
}

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .handler(HandlerFunc(test_handler))
        .build();
    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    addr
}

// Writes the whole input, half-closes, and reads until the server closes.
async fn roundtrip(addr: SocketAddr, input: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(input).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn wire_scenarios() {
    let addr = start_server().await;

    #[rustfmt::skip]
    let cases: &[(&str, &str)] = &[
        (
            "GET / HTTP/1.0\r\n\r\n",
            "HTTP/1.0 200 OK\r\nConnection: close\r\n\r\n",
        ),
        (
            "GET /?w=Hello HTTP/1.0\r\n\r\n",
            "HTTP/1.0 200 OK\r\nConnection: close\r\n\r\nHello",
        ),
        (
            // keep-alive is not honored without a response length.
            "GET /?w=Hello HTTP/1.0\r\nConnection: keep-alive\r\n\r\n",
            "HTTP/1.0 200 OK\r\nConnection: close\r\n\r\nHello",
        ),
        (
            "GET /?cl=5&w=Hello HTTP/1.0\r\n\r\n",
            "HTTP/1.0 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nHello",
        ),
        (
            "GET /?cl=5&w=Hello HTTP/1.0\r\nConnection: keep-alive\r\n\r\n",
            "HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nHello",
        ),
        (
            "GET /?w=Hello HTTP/1.1\r\n\r\n",
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0005\r\nHello\r\n0\r\n\r\n",
        ),
        (
            "GET /?cl=5&w=Hello HTTP/1.1\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello",
        ),
        (
            // POST with a form body.
            "POST /?cl=5 HTTP/1.1\r\nContent-Length: 7\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nw=Hello",
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello",
        ),
        (
            // POST with expect: the interim response precedes the body read.
            "POST /?cl=5 HTTP/1.1\r\nContent-Length: 7\r\nContent-Type: application/x-www-form-urlencoded\r\nExpect: 100-continue\r\n\r\nw=Hello",
            "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello",
        ),
        (
            // The handler never reads the body, so the connection must close.
            "POST /?cl=0 HTTP/1.1\r\nContent-Length: 7\r\n\r\nw=Hello",
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ),
        (
            // Two pipelined requests with identity encoded responses.
            "GET /?cl=5&w=Hello HTTP/1.1\r\n\r\nGET /?cl=5&w=Hello HTTP/1.1\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHelloHTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello",
        ),
        (
            // Two pipelined requests with chunked encoded responses.
            "GET /?w=Hello HTTP/1.1\r\n\r\nGET /?w=Hello HTTP/1.1\r\n\r\n",
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0005\r\nHello\r\n0\r\n\r\nHTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0005\r\nHello\r\n0\r\n\r\n",
        ),
        (
            // A chunked request body followed by a pipelined request: the
            // terminator is consumed even though the handler reads exactly
            // the advertised length.
            "POST /?cl=5 HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\n7\r\nw=Hello\r\n0\r\n\r\nGET /?cl=2&w=Hi HTTP/1.1\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHelloHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nHi",
        ),
        (
            // HEAD does not include a body for identity encoded responses.
            "HEAD /?cl=5&w=Hello HTTP/1.1\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n",
        ),
        (
            // HEAD does not include a body for chunked encoded responses.
            "HEAD /?w=Hello HTTP/1.1\r\n\r\n",
            "HTTP/1.1 200 OK\r\n\r\n",
        ),
        // Handler panics close the connection without a response.
        ("GET /?panic=before HTTP/1.1\r\n\r\n", ""),
        ("GET /?panic=after HTTP/1.1\r\n\r\n", ""),
        // A request the parser rejects closes the connection silently.
        ("BOGUS\r\n\r\n", ""),
    ];

    for (input, expected) in cases {
        let out = roundtrip(addr, input.as_bytes()).await;
        assert_eq!(
            String::from_utf8_lossy(&out),
            *expected,
            "in={:?}",
            input
        );
    }
}

#[tokio::test]
async fn websocket_echo() {
    let addr = start_server().await;

    let key3: &[u8] = b"P\xd7\xa4>mX\x18k";
    let mut input = Vec::new();
    input.extend_from_slice(
        b"GET /chat HTTP/1.1\r\n\
          Host: example.com\r\n\
          Origin: http://example.com\r\n\
          Connection: Upgrade\r\n\
          Upgrade: WebSocket\r\n\
          Sec-Websocket-Key1: 284<qQA84i92708  /\r\n\
          Sec-Websocket-Key2: z 4 d0 3 0a>mU 7N 1@991HP I {2\r\n\
          \r\n",
    );
    input.extend_from_slice(key3);
    input.extend_from_slice(b"\x00Hello\xff");

    let out = roundtrip(addr, &input).await;
    let text = String::from_utf8_lossy(&out);
    assert!(
        text.starts_with("HTTP/1.1 101 WebSocket Protocol Handshake\r\n"),
        "{}",
        text
    );

    let header_end = out
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator")
        + 4;
    let headers = String::from_utf8_lossy(&out[..header_end]);
    assert!(headers.contains("Upgrade: WebSocket\r\n"), "{}", headers);
    assert!(headers.contains("Connection: Upgrade\r\n"), "{}", headers);
    assert!(
        headers.contains("Sec-Websocket-Location: ws://example.com/chat\r\n"),
        "{}",
        headers
    );
    assert!(
        headers.contains("Sec-Websocket-Origin: http://example.com\r\n"),
        "{}",
        headers
    );

    // 16-byte challenge digest, then the echoed message.
    let mut hash = Md5::new();
    hash.update((2_848_492_708u32 / 2).to_be_bytes());
    hash.update((4_030_719_912u32 / 8).to_be_bytes());
    hash.update(key3);
    let digest = hash.finalize();
    assert_eq!(&out[header_end..header_end + 16], &digest[..]);
    assert_eq!(&out[header_end + 16..], b"\x00Hello\xff");
}

#[tokio::test]
async fn xsrf_protection() {
    let addr = start_server().await;

    // A GET establishes the token cookie and succeeds.
    let out = roundtrip(addr, b"GET /xsrf HTTP/1.1\r\n\r\n").await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{}", text);
    assert!(text.contains("Set-Cookie: xsrf="), "{}", text);

    // A POST without a token is routed to the error responder.
    let out = roundtrip(
        addr,
        b"POST /xsrf HTTP/1.1\r\nContent-Length: 0\r\n\r\n",
    )
    .await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"), "{}", text);
    assert!(text.contains("Set-Cookie: xsrf="), "{}", text);

    // A POST echoing the cookie token passes.
    let out = roundtrip(
        addr,
        b"POST /xsrf?xsrf=deadbeef HTTP/1.1\r\nCookie: xsrf=deadbeef\r\nContent-Length: 0\r\n\r\n",
    )
    .await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{}", text);
}

#[tokio::test]
async fn read_deadline_closes_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .handler(HandlerFunc(test_handler))
        .read_timeout(Duration::from_millis(100))
        .build();
    tokio::spawn(async move {
        let _ = server.serve().await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET / HTT").await.unwrap();

    // The server gives up on the stalled request line and closes.
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    assert!(out.is_empty());
}
