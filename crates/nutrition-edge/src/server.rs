//! HTTP/1.1 server adapter.
//!
//! Accepts connections with hyper, buffers each request body (bounded by the
//! validation timeout), attaches the peer address as [`ClientAddr`] and runs
//! the request through the [`Edge`] pipeline.
//!
//! # Example
//!
//! ```rust,ignore
//! use nutrition_edge::{shutdown_signal, Edge, EdgeServer};
//!
//! let edge = Edge::from_config(&config)?;
//! let server = EdgeServer::bind(&config.server, edge).await?;
//! server.serve(not_found, shutdown_signal()).await?;
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderValue;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use nutrition_edge_config::ServerConfig;
use nutrition_edge_core::EdgeError;
use nutrition_edge_middleware::types::headers;
use nutrition_edge_middleware::{
    error_response, BoxFuture, ClientAddr, MiddlewareContext, Request, Response,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::{Edge, ServerError};

/// Business handler driven at the end of the pipeline, once per request.
pub trait EdgeHandler: Send + Sync + 'static {
    /// Produces the response for a request that passed every stage.
    fn call(&self, ctx: &mut MiddlewareContext, request: Request) -> BoxFuture<'static, Response>;
}

impl<F> EdgeHandler for F
where
    F: Fn(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + Sync + 'static,
{
    fn call(&self, ctx: &mut MiddlewareContext, request: Request) -> BoxFuture<'static, Response> {
        self(ctx, request)
    }
}

/// A bound listener ready to serve an [`Edge`].
#[derive(Debug)]
pub struct EdgeServer {
    listener: TcpListener,
    edge: Edge,
    validation_timeout: Duration,
    shutdown_timeout: Duration,
}

impl EdgeServer {
    /// Binds `config.http_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address is invalid or taken.
    pub async fn bind(config: &ServerConfig, edge: Edge) -> Result<Self, ServerError> {
        let addr: SocketAddr = config.http_addr.parse().map_err(|e| {
            ServerError::bind(
                &config.http_addr,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            )
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;

        Ok(Self {
            listener,
            edge,
            validation_timeout: config.validation_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// The bound address (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns the listener's I/O error.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` completes, then waits up to the
    /// configured shutdown timeout for in-flight connections.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the local address cannot be read.
    pub async fn serve<H, F>(self, handler: H, shutdown: F) -> Result<(), ServerError>
    where
        H: EdgeHandler,
        F: Future<Output = ()> + Send,
    {
        let addr = self.listener.local_addr()?;
        let state = Arc::new(ConnectionState {
            edge: self.edge,
            handler: Arc::new(handler),
            validation_timeout: self.validation_timeout,
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        tracing::info!(%addr, "Edge server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let state = Arc::clone(&state);
                        let stop_rx = stop_rx.clone();
                        connections.spawn(async move {
                            serve_connection(stream, remote_addr, state, stop_rx).await;
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to accept connection"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                () = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        drop(self.listener);
        let _ = stop_tx.send(true);

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "Shutdown timeout reached, aborting open connections"
            );
            connections.abort_all();
        }

        tracing::info!("Edge server stopped");
        Ok(())
    }
}

struct ConnectionState {
    edge: Edge,
    handler: Arc<dyn EdgeHandler>,
    validation_timeout: Duration,
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    state: Arc<ConnectionState>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let service = service_fn(move |request: http::Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { Ok::<_, Infallible>(handle_request(&state, request, remote_addr).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(%remote_addr, error = %e, "Connection closed with error");
                }
                break;
            }
            _ = stop_rx.changed(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

async fn handle_request(
    state: &ConnectionState,
    request: http::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let request_id = parts.headers.get(headers::X_REQUEST_ID).cloned();

    let body = match tokio::time::timeout(state.validation_timeout, body.collect()).await {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) => {
            tracing::warn!(%remote_addr, error = %e, "Failed to read request body");
            return early_error(
                &EdgeError::invalid_input("Failed to read request body"),
                request_id,
            );
        }
        Err(_) => {
            tracing::warn!(%remote_addr, "Request body read timed out");
            return early_error(&EdgeError::timeout("Request body read timed out"), request_id);
        }
    };

    parts.extensions.insert(ClientAddr(remote_addr));
    let request = Request::from_parts(parts, Full::new(body));

    let handler = Arc::clone(&state.handler);
    state
        .edge
        .handle(request, move |ctx, request| handler.call(ctx, request))
        .await
}

fn early_error(error: &EdgeError, request_id: Option<HeaderValue>) -> Response {
    let mut response = error_response(error);
    if let Some(id) = request_id {
        response.headers_mut().insert(headers::X_REQUEST_ID, id);
    }
    response
}

/// Completes on SIGTERM or SIGINT (Ctrl+C elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                }
            }
            _ => {
                tracing::warn!("Failed to register signal handlers, falling back to Ctrl+C");
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C");
    }
}

/// A handler answering every request with `404 not found`.
pub fn not_found(_ctx: &mut MiddlewareContext, request: Request) -> BoxFuture<'static, Response> {
    let body = serde_json::json!({
        "error": "not_found",
        "message": format!("No route for {} {}", request.method(), request.uri().path()),
        "code": "NOT_FOUND",
    });
    Box::pin(async move {
        http::Response::builder()
            .status(http::StatusCode::NOT_FOUND)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .expect("failed to build not-found response")
    })
}
