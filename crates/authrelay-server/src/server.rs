//! `RelayServer`: Axum HTTP server exposing the relay.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::http::{self, AppState};
use crate::lifecycle;
use crate::relay::EventRelay;
use crate::shutdown::ShutdownCoordinator;

/// The relay HTTP server.
pub struct RelayServer {
    config: ServerConfig,
    relay: EventRelay,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a new server around `relay`.
    pub fn new(config: ServerConfig, relay: EventRelay) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout));
        Self {
            config,
            relay,
            metrics: None,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            keep_alive: self.config.keep_alive,
            shutdown: self.shutdown.token(),
        };

        Router::new()
            .route("/api/stream", get(http::stream))
            .route("/api/stream/snapshot", get(http::stream_snapshot))
            .route("/api/command", post(http::command))
            .route("/api/command/sync", post(http::command_sync))
            .route("/api/attributes/{auth_method_guid}", get(http::attributes))
            .route("/api/support-status", get(http::support_status))
            .route("/health", get(http::health))
            .route("/metrics", get(http::metrics))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr()).await
    }

    /// Serve on `listener` until shutdown is initiated.
    ///
    /// Starts the closed-listener sweeper for the lifetime of the server.
    /// Open subscription streams end once shutdown starts, so connections
    /// close without waiting for clients to hang up.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let token = self.shutdown.token();
        let sweeper = self.spawn_sweeper();
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "relay server listening");
        }

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;

        self.shutdown.shutdown();
        let _ = sweeper.await;
        info!("relay server stopped");
        result
    }

    /// Stop accepting connections and wait for `tasks` and pending relay jobs.
    pub async fn graceful_shutdown(&self, tasks: Vec<JoinHandle<()>>) -> bool {
        self.shutdown
            .graceful_shutdown(tasks, self.relay.scheduler())
            .await
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        lifecycle::spawn_sweeper(
            Arc::clone(self.relay.registry()),
            self.config.sweep_interval,
            self.shutdown.token(),
        )
    }

    /// Relay engine.
    pub fn relay(&self) -> &EventRelay {
        &self.relay
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
