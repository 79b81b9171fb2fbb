pub mod activity;
pub mod broadcasting;
pub mod follows;
pub mod notifications;
pub mod websocket;

use crate::{
    state::AppState,
    utils::middleware::{auth_middleware, request_id_middleware},
};
use axum::{
    http::{HeaderValue, Method},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Full HTTP surface with its middleware stack.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/notifications", notifications::router())
        .nest("/api/follows", follows::router())
        .nest("/api/activity", activity::router())
        .nest("/broadcasting", broadcasting::router())
        .nest("/ws", websocket::router())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors_layer(&state.config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(origins)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "courtside",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
