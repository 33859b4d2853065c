//! WebSocket gateway for client tunnels.

mod handler;
pub mod registry;
pub mod writer;

use crate::AppState;
use axum::Router;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tunnel", axum::routing::get(handler::tunnel_ws_handler))
        .with_state(state)
}
