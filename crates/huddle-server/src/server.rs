//! `HuddleServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use huddle_core::ConnectionId;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::{self as server_metrics, WS_CONNECTIONS_REFUSED_TOTAL};
use crate::relay::{self, RelayHandle};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay service handle.
    pub relay: RelayHandle,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Cancelled on shutdown; sessions run on child tokens.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Huddle relay server.
#[derive(Debug)]
pub struct HuddleServer {
    config: Arc<ServerConfig>,
    relay: RelayHandle,
    relay_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<ShutdownCoordinator>,
    cors_origin: HeaderValue,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl HuddleServer {
    /// Create the server and spawn its relay service.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: ServerConfig,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, ServerError> {
        let origin = config.frontend_url.trim_end_matches('/');
        let cors_origin =
            HeaderValue::from_str(origin).map_err(|source| ServerError::InvalidOrigin {
                origin: config.frontend_url.clone(),
                source,
            })?;

        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (relay, relay_task) =
            relay::spawn(config.pairing_ttl, config.sweep_interval, shutdown.token());

        Ok(Self {
            config: Arc::new(config),
            relay,
            relay_task: Mutex::new(Some(relay_task)),
            shutdown,
            cors_origin,
            start_time: Instant::now(),
            metrics,
        })
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            config: Arc::clone(&self.config),
            shutdown: self.shutdown.token(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let cors = CorsLayer::new()
            .allow_origin(self.cors_origin.clone())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true);

        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/relay/stats", get(stats_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });

        info!(%local_addr, frontend = %self.config.frontend_url, "huddle relay listening");
        Ok((local_addr, handle))
    }

    /// The relay service handle.
    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Take the relay service task so shutdown can await it. `None` after
    /// the first call.
    pub fn take_relay_task(&self) -> Option<JoinHandle<()>> {
        self.relay_task.lock().take()
    }
}

/// GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.relay.connection_count(),
    ))
}

/// GET /api/relay/stats
async fn stats_handler(State(state): State<AppState>) -> Response {
    match state.relay.stats().await {
        Some(stats) => Json(stats).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => server_metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let limit = state.config.max_connections;
    let Some(permit) = state.relay.try_reserve(limit) else {
        counter!(WS_CONNECTIONS_REFUSED_TOTAL).increment(1);
        warn!(limit, "connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let AppState {
        relay,
        config,
        shutdown,
        ..
    } = state;
    // the permit moves into the callback; a failed upgrade drops it unused
    ws.max_message_size(config.max_message_size)
        .on_failed_upgrade(|e| debug!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            run_ws_session(socket, ConnectionId::new(), permit, relay, config, shutdown)
        })
}
