//! Binding the HTTP surface to a socket.
//!
//! # Responsibilities
//! - Bind the configured address and report the bound address
//! - Serve each connection with the header-read and keep-alive timeouts
//! - Stop accepting on close and drain in-flight connections
//!
//! # Design Decisions
//! - `listen` resolves once the socket is bound or fails; there is no
//!   separate "listening" notification to wait for
//! - Idle keep-alive connections are closed gracefully by a per-connection
//!   ticker, busy ones are never interrupted

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tower::ServiceExt;

use crate::config::ListenerConfig;
use crate::net::{Activity, ConnectionId, ConnectionPermit, Listener, ListenerError};

/// The socket could not be bound.
#[derive(Debug, Error)]
#[error("failed to listen on {address}: {source}")]
pub struct BindError {
    pub address: String,
    #[source]
    pub source: ListenerError,
}

#[derive(Debug, Error)]
pub enum CloseError {
    #[error("accept loop failed: {0}")]
    AcceptLoop(#[source] tokio::task::JoinError),

    #[error("{failed} connection task(s) failed while draining")]
    Connections { failed: usize },
}

/// A listening HTTP server.
#[async_trait]
pub trait BoundServer: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    /// Stop accepting and wait for open connections to finish.
    /// Closing an already closed server is a no-op.
    async fn close(&self) -> Result<(), CloseError>;
}

/// Binds an application to a listening socket.
#[async_trait]
pub trait Binder: Send + Sync {
    async fn listen(&self, app: Router, config: &ListenerConfig) -> Result<Arc<dyn BoundServer>, BindError>;
}

/// Production binder over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpBinder;

#[async_trait]
impl Binder for TcpBinder {
    async fn listen(&self, app: Router, config: &ListenerConfig) -> Result<Arc<dyn BoundServer>, BindError> {
        let server = TcpServer::bind(app, config).await?;
        Ok(Arc::new(server))
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionTimeouts {
    headers: Duration,
    keep_alive: Option<Duration>,
}

impl ConnectionTimeouts {
    fn from_config(config: &ListenerConfig) -> Self {
        Self {
            headers: Duration::from_secs(config.headers_timeout_secs),
            keep_alive: (config.keep_alive_timeout_secs > 0)
                .then(|| Duration::from_secs(config.keep_alive_timeout_secs)),
        }
    }

    /// How often an idle connection is checked against the keep-alive timeout.
    fn idle_check(&self) -> Duration {
        self.keep_alive
            .map(|k| (k / 4).clamp(Duration::from_millis(50), Duration::from_secs(1)))
            .unwrap_or(Duration::from_secs(1))
    }
}

/// HTTP/1.1 server on a bounded TCP listener.
pub struct TcpServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<JoinSet<()>>>>,
}

impl TcpServer {
    pub async fn bind(app: Router, config: &ListenerConfig) -> Result<Self, BindError> {
        let bind_err = |source| BindError {
            address: config.bind_address.clone(),
            source,
        };
        let listener = Listener::bind(config).await.map_err(bind_err)?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| bind_err(ListenerError::Bind(e)))?;

        let timeouts = ConnectionTimeouts::from_config(config);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, app, timeouts, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }
}

#[async_trait]
impl BoundServer for TcpServer {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn close(&self) -> Result<(), CloseError> {
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(task) = task else {
            return Ok(());
        };

        let _ = self.shutdown.send(true);
        let mut connections = task.await.map_err(CloseError::AcceptLoop)?;
        let open = connections.len();
        if open > 0 {
            tracing::info!(connections = open, "Draining open connections");
        }

        let mut failed = 0;
        while let Some(result) = connections.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Connection task failed while draining");
                failed += 1;
            }
        }

        tracing::info!(address = %self.local_addr, "Listener closed");
        if failed > 0 {
            return Err(CloseError::Connections { failed });
        }
        Ok(())
    }
}

/// Accept until shutdown, then hand back the still-open connections.
async fn accept_loop(
    listener: Listener,
    app: Router,
    timeouts: ConnectionTimeouts,
    mut shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        permit,
                        app.clone(),
                        timeouts,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }

        while connections.try_join_next().is_some() {}
    }

    connections
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    app: Router,
    timeouts: ConnectionTimeouts,
    mut shutdown: watch::Receiver<bool>,
) {
    let id = ConnectionId::new();
    let activity = Arc::new(Activity::new());

    let service = {
        let activity = Arc::clone(&activity);
        service_fn(move |mut request: Request<Incoming>| {
            let app = app.clone();
            let activity = Arc::clone(&activity);
            request.extensions_mut().insert(ConnectInfo(peer));
            async move {
                let _busy = activity.begin();
                Ok::<_, Infallible>(app.oneshot(request).await.unwrap_or_else(|never| match never {}))
            }
        })
    };

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.headers)
        .keep_alive(timeouts.keep_alive.is_some());
    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut idle_check = tokio::time::interval(timeouts.idle_check());
    let mut draining = false;

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %id, peer_addr = %peer, error = %e, "Connection ended with error");
                }
                break;
            }
            _ = shutdown.changed(), if !draining => {
                conn.as_mut().graceful_shutdown();
                draining = true;
            }
            _ = idle_check.tick(), if !draining && timeouts.keep_alive.is_some() => {
                if timeouts.keep_alive.is_some_and(|limit| activity.idle_for() >= limit) {
                    tracing::trace!(connection_id = %id, "Closing idle keep-alive connection");
                    conn.as_mut().graceful_shutdown();
                    draining = true;
                }
            }
        }
    }

    tracing::trace!(connection_id = %id, peer_addr = %peer, "Connection closed");
}
