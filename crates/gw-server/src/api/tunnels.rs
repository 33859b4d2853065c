//! Tunnels API: inspect live tunnels and force them closed.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::ws::registry::TunnelSummary;
use crate::AppState;
use gw_common::{AppError, AppResult};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(list_tunnels))
        .route("/{id}", get(get_tunnel).delete(kill_tunnel))
        .with_state(state)
}

// ─── Handlers ────────────────────────────────────────────────

/// GET /api/tunnels, oldest first.
async fn list_tunnels(State(state): State<Arc<AppState>>) -> Json<Vec<TunnelSummary>> {
    Json(state.registry.summaries())
}

/// GET /api/tunnels/:id
async fn get_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TunnelSummary>> {
    state
        .registry
        .summary(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Tunnel {id} not found")))
}

/// DELETE /api/tunnels/:id. The tunnel's handler closes both sides.
async fn kill_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if state.registry.kill(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Tunnel {id} not found")))
    }
}
