//! Admin API routes module.

mod health;
mod stats;
mod tunnels;

use crate::AppState;
use axum::Router;
use std::sync::Arc;

/// Build the API router with all sub-routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/tunnels", tunnels::router(state.clone()))
        .nest("/stats", stats::router(state))
        .merge(health::router())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::workers::TickerScheduler;
    use crate::ws::registry::TunnelRegistry;
    use crate::AppState;

    pub fn state() -> Arc<AppState> {
        Arc::new(AppState {
            config: gw_common::AppConfig::default(),
            registry: TunnelRegistry::new(),
            scheduler: TickerScheduler::new(),
        })
    }

    /// Run one request through `app`, returning status and JSON body
    /// (`Value::Null` for an empty body).
    pub async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{call, state};
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health_reports_service_name() {
        let (status, body) = call(router(state()), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "gw-server");
    }
}
