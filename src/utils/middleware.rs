use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// 认证中间件
///
/// Makes the auth service available to the `CurrentUser` extractor. Routes
/// that need a caller reject the request themselves.
pub async fn auth_middleware<B>(
    State(app_state): State<Arc<AppState>>,
    mut request: Request<B>,
    next: Next<B>,
) -> Response {
    request
        .extensions_mut()
        .insert(app_state.auth_service.clone());
    next.run(request).await
}

/// 请求 ID 中间件
pub async fn request_id_middleware<B>(mut request: Request<B>, next: Next<B>) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    debug!("{} {} [{}]", request.method(), request.uri().path(), request_id);
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
