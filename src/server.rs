//! Connection handling.
//!
//! [`Server`] owns the listener. Each accepted connection runs on its own
//! task through hyper's protocol-detecting builder (HTTP/1.1 or h2c), and
//! each request on it is buffered and handed to the shared
//! [`Dispatcher`].
//!
//! # Shutdown
//!
//! SIGTERM or Ctrl-C stops the accept loop at once. Connections already
//! open are allowed to finish, then [`Server::serve`] returns. Under a
//! container orchestrator this fits inside the usual grace period between
//! SIGTERM and SIGKILL.
//!
//! # Request bodies
//!
//! Bodies are read into memory before dispatch, capped at
//! [`max_body_bytes`](Server::max_body_bytes). A larger body gets
//! `413 Payload Too Large` and never reaches a handler; a body that fails
//! mid-stream gets `400 Bad Request`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::response::ResponseWriter;

const DEFAULT_MAX_BODY_BYTES: usize = 16 << 20;

/// Accepts connections and feeds their requests to a [`Dispatcher`].
///
/// ```rust,no_run
/// use waypoint::{Dispatcher, Server};
///
/// # async fn run(app: Dispatcher) -> Result<(), waypoint::Error> {
/// Server::bind("127.0.0.1:8080")
///     .max_body_bytes(1 << 20)
///     .serve(app)
///     .await
/// # }
/// ```
pub struct Server {
    addr: SocketAddr,
    max_body_bytes: usize,
}

impl Server {
    /// # Panics
    ///
    /// If `addr` does not parse as `ip:port`. The address is normally a
    /// constant or comes from startup configuration, where failing loudly
    /// is the right outcome.
    pub fn bind(addr: &str) -> Self {
        let Ok(addr) = addr.parse::<SocketAddr>() else {
            panic!("`{addr}` is not a valid socket address");
        };
        Self { addr, max_body_bytes: DEFAULT_MAX_BODY_BYTES }
    }

    /// Caps buffered request bodies. Defaults to 16 MiB.
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Serves until a shutdown signal arrives and every open connection has
    /// finished.
    ///
    /// The dispatcher is consumed: once serving starts no more routes can be
    /// registered.
    pub async fn serve(self, dispatcher: Dispatcher) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "listening");

        let dispatcher = Arc::new(dispatcher);
        let mut connections = JoinSet::new();
        let mut shutdown = std::pin::pin!(shutdown_signal());

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        connections.spawn(connection(stream, peer, dispatcher, self.max_body_bytes));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },

                // finished connections
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(open = connections.len(), "shutting down, waiting for open connections");
        while connections.join_next().await.is_some() {}
        info!("stopped");
        Ok(())
    }
}

async fn connection(stream: TcpStream, peer: SocketAddr, dispatcher: Arc<Dispatcher>, limit: usize) {
    let svc = service_fn(move |req| dispatch(Arc::clone(&dispatcher), req, peer, limit));

    let served = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), svc)
        .await;
    match served {
        Ok(()) => debug!(%peer, "connection closed"),
        Err(e) => error!(%peer, "connection failed: {e}"),
    }
}

/// Buffers one request body and dispatches the request. Never fails: a
/// body that cannot be read becomes a 4xx response.
async fn dispatch(
    dispatcher: Arc<Dispatcher>,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
    limit: usize,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let status = if e.is::<LengthLimitError>() {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            let err = Error::Body(e);
            warn!(%peer, path = parts.uri.path(), status = status.as_u16(), "{err}");
            return Ok(ResponseWriter::new().into_response_or(status));
        }
    };

    Ok(dispatcher.handle(http::Request::from_parts(parts, body), Some(peer)).await)
}

/// Completes on SIGTERM or Ctrl-C (Ctrl-C only off Unix).
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}
