//! Gateway statistics: live counts from the in-memory registry.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(get_stats)).with_state(state)
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    active_tunnels: usize,
    active_tickers: usize,
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        active_tunnels: state.registry.active_tunnel_count(),
        active_tickers: state.scheduler.active_tickers(),
    })
}
