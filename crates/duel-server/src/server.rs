use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use duel_core::challenge::ChallengeLibrary;
use duel_core::ids::{ConnectionId, UserId};
use duel_core::judge::JudgeGateway;
use duel_session::SessionStore;
use duel_telemetry::{MetricsRecorder, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::coordinator::{CoordinatorConfig, SessionCoordinator};
use crate::registry::{self, ConnectionRegistry};

const FRAME_QUEUE: usize = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    /// Connections silent this long are treated as disconnected.
    pub client_timeout: Duration,
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub frame_tx: mpsc::Sender<(ConnectionId, String)>,
    pub heartbeat_interval: Duration,
    pub start_time: Instant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    #[serde(default, alias = "user_id")]
    user_id: Option<String>,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
    pub sessions: usize,
    pub waiting: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, spawn the background tasks and start serving.
pub async fn start(
    config: ServerConfig,
    library: Arc<dyn ChallengeLibrary>,
    judge: Arc<dyn JudgeGateway>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let coordinator = SessionCoordinator::new(
        Arc::new(SessionStore::new()),
        Arc::clone(&registry),
        library,
        judge,
        metrics,
        config.coordinator.clone(),
    );
    let shutdown = CancellationToken::new();

    let (frame_tx, frame_rx) = mpsc::channel::<(ConnectionId, String)>(FRAME_QUEUE);
    let dispatch = tokio::spawn(dispatch_frames(
        frame_rx,
        Arc::clone(&coordinator),
        shutdown.clone(),
    ));
    let cleanup = start_cleanup_task(
        Arc::clone(&coordinator),
        config.heartbeat_interval,
        config.client_timeout,
        shutdown.clone(),
    );

    let state = AppState {
        coordinator: Arc::clone(&coordinator),
        frame_tx,
        heartbeat_interval: config.heartbeat_interval,
        start_time: Instant::now(),
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "duel server started");

    let server_token = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
        {
            warn!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        coordinator,
        shutdown,
        server,
        dispatch,
        cleanup,
    })
}

/// Handle returned by [`start`]. Keeps the background tasks alive until
/// [`ServerHandle::shutdown`].
pub struct ServerHandle {
    pub port: u16,
    coordinator: Arc<SessionCoordinator>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    dispatch: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl ServerHandle {
    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// Stop accepting connections, cancel deadline timers and wait briefly
    /// for in-flight work.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.shutdown.cancel();
        self.coordinator.shutdown();

        let drain = futures::future::join_all([self.server, self.dispatch, self.cleanup]);
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("shutdown timed out after {SHUTDOWN_GRACE:?}, some tasks may still be running");
        }
    }
}

/// WebSocket upgrade handler. `?userId=` carries the caller's identity.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let user_id = params
        .user_id
        .filter(|id| !id.trim().is_empty())
        .map(UserId::from_raw);
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<UserId>) {
    let registry = Arc::clone(state.coordinator.registry());
    let (connection_id, rx) = registry.register(user_id);
    state.coordinator.on_connect(&connection_id).await;

    registry::handle_ws_connection(
        socket,
        connection_id.clone(),
        rx,
        registry,
        state.frame_tx,
        state.heartbeat_interval,
    )
    .await;

    state.coordinator.on_disconnect(&connection_id);
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let coordinator = &state.coordinator;
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        connections: coordinator.registry().count(),
        sessions: coordinator.store().len(),
        waiting: coordinator.waiting_count(),
    })
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.coordinator.metrics().snapshot())
}

/// Hand each inbound frame to its own task so a slow judgment never holds
/// up other connections.
async fn dispatch_frames(
    mut rx: mpsc::Receiver<(ConnectionId, String)>,
    coordinator: Arc<SessionCoordinator>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = rx.recv() => {
                let Some((connection_id, text)) = frame else { break };
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    coordinator.handle_frame(&connection_id, &text).await;
                });
            }
        }
    }
}

/// Periodically drop connections that stopped answering pings.
pub fn start_cleanup_task(
    coordinator: Arc<SessionCoordinator>,
    interval: Duration,
    client_timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let dead = coordinator.registry().dead_connections(client_timeout);
                    if !dead.is_empty() {
                        info!(removed = dead.len(), "dead connection cleanup");
                    }
                    for connection_id in dead {
                        coordinator.on_disconnect(&connection_id);
                    }
                }
            }
        }
    })
}
