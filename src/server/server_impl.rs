//! Server configuration, the acceptor loop and the handler contract.

use crate::server::{
    connection::serve_connection,
    stream::{is_temporary, ByteStream},
    transaction::Transaction,
};
use crate::HeaderMap;
use futures_util::future::BoxFuture;
use std::{future::Future, io, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// A web handler. The server calls `serve` with one transaction per
/// request; the handler responds through the transaction exactly once, or
/// hijacks the stream, or returns without responding to get a default empty
/// `200 OK`.
///
/// ```no_run
/// use twister::{Handler, HeaderMap, Transaction};
///
/// struct Hello;
///
/// impl Handler for Hello {
///     async fn serve(&self, txn: &mut Transaction<'_>) {
///         txn.respond(twister::status::OK, HeaderMap::new()).await;
///         let _ = txn.write(b"Hello, World!\n").await;
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, txn: &mut Transaction<'_>) -> impl Future<Output = ()> + Send;
}

/// Adapts a function returning a boxed future to the [`Handler`] trait.
///
/// ```no_run
/// use futures_util::future::BoxFuture;
/// use twister::{HandlerFunc, HeaderMap, Transaction};
///
/// fn hello<'a>(txn: &'a mut Transaction<'_>) -> BoxFuture<'a, ()> {
///     Box::pin(async move {
///         txn.respond(twister::status::OK, HeaderMap::new()).await;
///     })
/// }
///
/// let handler = HandlerFunc(hello);
/// ```
pub struct HandlerFunc<F>(pub F);

impl<F> Handler for HandlerFunc<F>
where
    F: for<'a, 'c> Fn(&'a mut Transaction<'c>) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    fn serve(&self, txn: &mut Transaction<'_>) -> impl Future<Output = ()> + Send {
        (self.0)(txn)
    }
}

/// Information about one completed transaction, for logging.
#[derive(Debug)]
pub struct LogRecord {
    /// Request method.
    pub method: String,
    /// Request URL, possibly rewritten by the core.
    pub url: String,
    /// Response status, 0 when the connection was hijacked.
    pub status: u16,
    /// Response headers as committed to the wire.
    pub header: HeaderMap,
    /// Size of the status line and header block in bytes.
    pub header_size: usize,
    /// Total bytes written to the stream, prelude and framing included.
    pub written: usize,
    /// True when the handler took over the stream.
    pub hijacked: bool,
    /// Error encountered while handling the request, if any.
    pub error: Option<String>,
}

/// Receives one record per transaction.
pub trait Logger: Send + Sync {
    fn log(&self, record: &LogRecord);
}

/// Logs a short summary of each request through `tracing`.
pub struct ShortLogger;

impl Logger for ShortLogger {
    fn log(&self, record: &LogRecord) {
        match &record.error {
            Some(error) => info!(
                status = record.status,
                method = %record.method,
                url = %record.url,
                %error,
                "request",
            ),
            None => info!(
                status = record.status,
                method = %record.method,
                url = %record.url,
                "request",
            ),
        }
    }
}

pub(crate) struct ServerConfig {
    pub(crate) secure: bool,
    pub(crate) default_host: String,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) logger: Option<Arc<dyn Logger>>,
    pub(crate) recover_handlers: bool,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            secure: false,
            default_host: String::new(),
            read_timeout: None,
            write_timeout: None,
            logger: None,
            recover_handlers: true,
        }
    }
}

pub(crate) struct ServerInner<H> {
    pub(crate) config: ServerConfig,
    pub(crate) handler: H,
}

/// An HTTP/1.x server: accepts connections from its listener and runs one
/// transaction loop per connection.
///
/// ```no_run
/// use twister::{Handler, HeaderMap, Server, Transaction};
/// use tokio::net::TcpListener;
///
/// struct Hello;
///
/// impl Handler for Hello {
///     async fn serve(&self, txn: &mut Transaction<'_>) {
///         txn.respond(twister::status::OK, HeaderMap::new()).await;
///         let _ = txn.write(b"Hello, World!\n").await;
///     }
/// }
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
///     Server::builder()
///         .listener(listener)
///         .handler(Hello)
///         .build()
///         .serve()
///         .await
///         .unwrap();
/// }
/// ```
pub struct Server<H> {
    listener: TcpListener,
    inner: Arc<ServerInner<H>>,
}

impl Server<()> {
    /// Creates a new builder for configuring a server.
    pub fn builder() -> ServerBuilder<()> {
        ServerBuilder {
            listener: None,
            handler: None,
            config: ServerConfig::default(),
        }
    }
}

impl<H: Handler> Server<H> {
    /// Accepts incoming connections, spawning one task per connection.
    ///
    /// Accept errors that report themselves as temporary are logged and
    /// retried; any other error stops the server and is returned.
    pub async fn serve(self) -> io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let inner = self.inner.clone();
                    tokio::spawn(serve_connection(inner, Box::new(stream), addr.to_string()));
                }
                Err(e) if is_temporary(&e) => {
                    warn!(error = %e, "accept error");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs the transaction loop on an already-accepted stream. Useful for
    /// listeners the server does not manage itself, such as TLS acceptors.
    pub async fn serve_stream<S>(&self, stream: S, remote_addr: String)
    where
        S: ByteStream + 'static,
    {
        serve_connection(self.inner.clone(), Box::new(stream), remote_addr).await;
    }
}

/// Builder for [`Server`] instances.
pub struct ServerBuilder<H> {
    listener: Option<TcpListener>,
    handler: Option<H>,
    config: ServerConfig,
}

impl<H> ServerBuilder<H> {
    /// Sets the TCP listener the server accepts connections on.
    ///
    /// **This is a required component.**
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the request handler.
    ///
    /// **This is a required component.**
    pub fn handler<NewH: Handler>(self, handler: NewH) -> ServerBuilder<NewH> {
        ServerBuilder {
            listener: self.listener,
            handler: Some(handler),
            config: self.config,
        }
    }

    /// Marks the server as sitting behind TLS: request URL schemes are set
    /// to `https`.
    pub fn secure(mut self, secure: bool) -> Self {
        self.config.secure = secure;
        self
    }

    /// Host used for requests that carry no host of their own.
    pub fn default_host(mut self, host: &str) -> Self {
        self.config.default_host = host.to_string();
        self
    }

    /// Deadline applied to each read from a connection.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Deadline applied to each write to a connection.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = Some(timeout);
        self
    }

    /// Installs a per-transaction logger.
    pub fn logger<L: Logger + 'static>(mut self, logger: L) -> Self {
        self.config.logger = Some(Arc::new(logger));
        self
    }

    /// Disables the panic-recovery barrier around handlers; panics then
    /// propagate to the connection task.
    pub fn no_recover_handlers(mut self, no_recover: bool) -> Self {
        self.config.recover_handlers = !no_recover;
        self
    }
}

impl<H: Handler> ServerBuilder<H> {
    /// Finalizes the builder.
    ///
    /// # Panics
    ///
    /// Panics when the `listener` or `handler` method was not called.
    #[track_caller]
    pub fn build(self) -> Server<H> {
        let listener = self
            .listener
            .expect("the `listener` method must be called to create");
        let handler = self
            .handler
            .expect("the `handler` method must be called to create");
        Server {
            listener,
            inner: Arc::new(ServerInner {
                config: self.config,
                handler,
            }),
        }
    }
}

/// Convenience entry point: binds a TCP listener on `addr`, installs the
/// short logger and serves `handler` until the listener fails.
pub async fn run<H: Handler>(addr: &str, handler: H) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    Server::builder()
        .listener(listener)
        .handler(handler)
        .logger(ShortLogger)
        .build()
        .serve()
        .await
}
