//! `RelayServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use relay_core::IdProvider;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::context::RelayContext;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::dispatcher::Dispatcher;
use crate::websocket::registry::Registry;
use crate::websocket::session::ws_handler;

/// Plain-text body of `GET /`.
pub const GREETING: &str = "Welcome to the Chat Room!";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay context (registry, publisher, id provider).
    pub context: Arc<RelayContext>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `GET /metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    context: Arc<RelayContext>,
    dispatcher: Mutex<Option<Dispatcher>>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a server. Nothing runs until [`RelayServer::listen`].
    pub fn new(
        config: ServerConfig,
        ids: Arc<dyn IdProvider>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let (context, subscriber) = RelayContext::new(&config, ids);
        let context = Arc::new(context);
        let dispatcher = Dispatcher::new(
            Arc::clone(&context.registry),
            subscriber,
            config.heartbeat_interval,
        )
        .with_write_timeout(config.write_timeout);
        Self {
            config,
            context,
            dispatcher: Mutex::new(Some(dispatcher)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            context: Arc::clone(&self.context),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(greeting_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the listener, start the dispatcher, and serve until shutdown.
    ///
    /// Returns the bound address and a handle that completes once both the
    /// HTTP server and the dispatcher have stopped.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let requested = self.config.bind_address();
        let bind_error = |source: std::io::Error| ServerError::Bind {
            addr: requested.clone(),
            source,
        };

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(&bind_error)?;
        let addr = listener.local_addr().map_err(&bind_error)?;
        let dispatcher = self
            .dispatcher
            .lock()
            .take()
            .ok_or(ServerError::AlreadyListening)?;

        let token = self.shutdown.token();
        let dispatch_token = token.clone();
        let dispatch = tokio::spawn(async move {
            let exit = dispatcher.run(dispatch_token).await;
            info!(?exit, "dispatcher stopped");
        });

        let router = self.router();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(error) = serve.await {
                error!(%error, "server error");
            }
            let _ = dispatch.await;
        });

        info!(%addr, "relay listening");
        Ok((addr, handle))
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.context.registry
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET /
async fn greeting_handler() -> &'static str {
    GREETING
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.context.registry.len().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
