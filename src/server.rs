//! Admin, metrics and status HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use tokio::sync::{mpsc, oneshot};

use crate::admin::{AdminRequest, AdminResponse, AdminTask};
use crate::indexing::IngestorTracker;

pub const ADMIN_PATH: &str = "/admin";
pub const METRICS_PATH: &str = "/metrics";
pub const STATUS_PATH: &str = "/status";

#[derive(Clone)]
pub struct ServerState {
    admin_tx: mpsc::Sender<AdminTask>,
    tracker: Arc<IngestorTracker>,
}

impl ServerState {
    pub fn new(admin_tx: mpsc::Sender<AdminTask>, tracker: Arc<IngestorTracker>) -> Self {
        Self { admin_tx, tracker }
    }
}

pub fn app(state: ServerState) -> Router {
    Router::new()
        .route(ADMIN_PATH, post(admin_handler))
        .route(METRICS_PATH, get(metrics_handler))
        .route(STATUS_PATH, get(status_handler))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn run_server(
    addr: SocketAddr,
    state: ServerState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), axum::Error> {
    tracing::info!("[SERVER] Listening on http://{addr}");
    axum::Server::try_bind(&addr)
        .map_err(axum::Error::new)?
        .serve(app(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(axum::Error::new)
}

fn unavailable(task: String, error: &str) -> (StatusCode, Json<AdminResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(AdminResponse {
            task,
            success: false,
            result: None,
            error: Some(error.to_string()),
        }),
    )
}

async fn admin_handler(
    State(state): State<ServerState>,
    Json(request): Json<AdminRequest>,
) -> (StatusCode, Json<AdminResponse>) {
    tracing::info!("[SERVER] Admin task {}", request.task);
    let task = request.task.clone();
    let (reply, rx) = oneshot::channel();

    if state.admin_tx.send(AdminTask { request, reply }).await.is_err() {
        return unavailable(task, "admin queue closed");
    }
    match rx.await {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(_) => unavailable(task, "admin task dropped"),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("[SERVER] Failed to encode metrics: {e}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain".to_string())],
            b"Failed to encode metrics".to_vec(),
        );
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
}

async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let status = state.tracker.get_status().await;
    let healthy = state.tracker.is_healthy().await;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}
