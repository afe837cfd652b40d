//! twister - an HTTP/1.0 and HTTP/1.1 server core for web applications.
//!
//! The crate implements the transaction engine of a web server: a
//! per-connection state machine that parses requests from a byte stream,
//! dispatches them to an application handler, streams the response back with
//! correct framing (identity or chunked), and manages keep-alive and
//! pipelining. Protocol escape hatches are part of the contract: handlers
//! can take over the raw stream with [`Transaction::hijack`], and clients
//! sending `Expect: 100-continue` get the interim response before the body
//! is read.
//!
//! # Protocol support
//!
//! - **HTTP/1.1** with persistent connections, serial pipelining and
//!   chunked transfer encoding on both the request and response side.
//! - **HTTP/1.0** including `Connection: keep-alive`.
//! - **WebSocket** upgrades for the hixie-76 handshake via
//!   [`websocket::upgrade`].
//!
//! # Quick start
//!
//! ```no_run
//! use twister::{Handler, HeaderMap, Server, Transaction};
//! use tokio::net::TcpListener;
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     async fn serve(&self, txn: &mut Transaction<'_>) {
//!         let mut header = HeaderMap::new();
//!         header.set(twister::header::CONTENT_TYPE, "text/plain");
//!         txn.respond(twister::status::OK, header).await;
//!         let _ = txn.write(b"Hello, World!\n").await;
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     Server::builder()
//!         .listener(listener)
//!         .handler(Hello)
//!         .build()
//!         .serve()
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! Scheduling is parallel by connection: every accepted stream runs its own
//! transaction loop on its own task, and within one connection everything
//! is strictly sequential. The core keeps no state across connections.

pub mod http {
    pub mod cookie;
    pub mod headers;
    pub mod params;
    pub mod request;
    pub mod types;
    pub mod url;
}
pub(crate) mod server {
    pub(crate) mod body;
    pub(crate) mod connection;
    pub(crate) mod server_impl;
    pub(crate) mod stream;
    pub(crate) mod transaction;
}
pub mod oauth;
pub mod security;
pub mod websocket;
pub(crate) mod errors;

pub use crate::{
    errors::{Error, IoError},
    http::{
        cookie::{format_delta_days, format_delta_seconds, parse_cookie_values, Cookie},
        headers::{
            canonical_name, header, quote_header_value, quote_header_value_or_token,
            unquote_header_value, HeaderMap,
        },
        params::ParamMap,
        request::{Env, ErrorHandler, Request},
        types::{protocol_version, status, PROTOCOL_VERSION_10, PROTOCOL_VERSION_11},
        url::Url,
    },
    server::{
        server_impl::{
            run, Handler, HandlerFunc, LogRecord, Logger, Server, ServerBuilder, ShortLogger,
        },
        stream::{BoxStream, ByteStream},
        transaction::{default_error_handler, RespondFilter, Transaction},
    },
};
