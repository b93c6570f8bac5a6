//! Event stream server listener
//!
//! Binds the TCP listener and serves the stream route until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastQueue;
use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::routes::{router, StreamState};
use crate::stats::ServerStats;

/// Streams a [`BroadcastQueue`] to every connected HTTP client
pub struct SseServer {
    config: ServerConfig,
    state: StreamState,
}

impl SseServer {
    /// Create a new server streaming `queue`
    pub fn new(config: ServerConfig, queue: Arc<BroadcastQueue>) -> Self {
        let state = StreamState::new(&config, queue);
        Self { config, state }
    }

    /// Get a reference to the queue being streamed
    pub fn queue(&self) -> &Arc<BroadcastQueue> {
        &self.state.queue
    }

    /// Snapshot of the server counters
    pub fn stats(&self) -> ServerStats {
        self.state.metrics.snapshot()
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// The stream route, for mounting inside a larger application
    ///
    /// Streams served through it end only when the client hangs up or the
    /// queue closes. Limits and counters are shared with this server.
    pub fn router(&self) -> Router {
        router(&self.config.route_path(), self.state.clone())
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    ///
    /// Open streams are ended when `shutdown` completes, and this returns
    /// once their connections have closed.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let path = self.config.route_path();
        tracing::info!(addr = %addr, path = %path, "Event stream server listening");

        let streams = CancellationToken::new();
        let app = router(&path, self.state.with_shutdown(streams.clone()));

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
                streams.cancel();
            })
            .await?;

        tracing::info!(addr = %addr, "Event stream server stopped");
        Ok(())
    }
}
