//! HTTP transport and graceful shutdown.
//!
//! The server is the piece that feeds the chain: for every request it
//! collects the body, builds a [`Context`] from the [`App`], installs the
//! request and a [`Recorder`] sink, and runs the chain on a blocking worker.
//! Handlers are synchronous and may block (a quota lookup, a file read), so
//! they never run on the async reactor threads.
//!
//! There is no routing: every request goes through the app's single chain.
//!
//! Bodies are read into memory before the chain runs, up to
//! [`Server::body_limit`] bytes ([`DEFAULT_BODY_LIMIT`] unless configured).
//! A larger body is answered with `413 Payload Too Large` and the chain never
//! sees the request.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`].

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::response::Recorder;

/// Request bodies larger than this are rejected unless the server is
/// configured otherwise.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    body_limit: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// ```rust,no_run
    /// use strand::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr, body_limit: DEFAULT_BODY_LIMIT }
    }

    /// Largest request body, in bytes, read before the chain runs.
    ///
    /// ```rust,no_run
    /// use strand::Server;
    /// let server = Server::bind("0.0.0.0:3000").body_limit(64 * 1024);
    /// ```
    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Serves `app` until SIGTERM or Ctrl-C, then drains in-flight connections.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        run(listener, app, shutdown_signal(), self.body_limit).await
    }

    /// Serves `app` on an already bound `listener` until `shutdown` resolves.
    /// The address given to [`bind`](Server::bind) is ignored.
    pub async fn serve_with_shutdown(
        self,
        listener: TcpListener,
        app: App,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        run(listener, app, shutdown, self.body_limit).await
    }
}

/// Serves `app` on an already bound listener until `shutdown` resolves,
/// with the default body limit.
///
/// Useful when the caller picks the port (tests bind `127.0.0.1:0`) or
/// owns the shutdown trigger.
pub async fn serve_with_shutdown(
    listener: TcpListener,
    app: App,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    run(listener, app, shutdown, DEFAULT_BODY_LIMIT).await
}

async fn run(
    listener: TcpListener,
    app: App,
    shutdown: impl Future<Output = ()>,
    body_limit: usize,
) -> Result<(), Error> {
    let app = Arc::new(app);
    info!(addr = %listener.local_addr()?, body_limit, "strand listening");

    let mut tasks = tokio::task::JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let app = Arc::clone(&app);
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    let svc = service_fn(move |req| {
                        let app = Arc::clone(&app);
                        async move { dispatch(app, req, remote_addr, body_limit).await }
                    });

                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("strand stopped");
    Ok(())
}

// ── Request dispatch ──────────────────────────────────────────────────────────

type HttpResponse = http::Response<Full<Bytes>>;

/// Runs one request through the chain. Failures become 4xx/5xx responses;
/// hyper never sees an error.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
    body_limit: usize,
) -> Result<HttpResponse, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match collect_body(body, body_limit).await {
        Ok(bytes) => bytes,
        Err(status) => {
            warn!(peer = %remote_addr, status = status.as_u16(), body_limit, "request body rejected");
            return Ok(bare(status));
        }
    };

    let method = parts.method.clone();
    let path = parts.uri.path().to_owned();
    let request = Request::new(parts.method, parts.uri, parts.headers, body)
        .with_remote_addr(remote_addr);

    let recorder = Recorder::new();
    let sink = recorder.sink();

    // One blocking worker per request: handlers are synchronous.
    let outcome = tokio::task::spawn_blocking(move || {
        let mut ctx = Context::new(app);
        ctx.bind(request, sink);
        ctx.run()
    })
    .await;

    match outcome {
        Ok(state) => {
            let response = recorder.into_response();
            debug!(%method, %path, status = response.status().as_u16(), ?state, "request handled");
            Ok(response)
        }
        Err(e) => {
            error!(%method, %path, "handler chain panicked: {e}");
            Ok(bare(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Reads at most `limit` bytes of `body`. Over the limit is 413, any other
/// read failure 400.
async fn collect_body<B>(body: B, limit: usize) -> Result<Bytes, StatusCode>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(StatusCode::PAYLOAD_TOO_LARGE),
        Err(e) => {
            debug!("failed to read request body: {e}");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

fn bare(status: StatusCode) -> HttpResponse {
    let mut response = http::Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C only on non-Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
