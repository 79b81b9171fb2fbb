use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{Json, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::{
    error::Result,
    models::{response::ApiResponse, websocket::WebSocketStats},
    services::auth::{CurrentUser, HandshakeUser},
    state::AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // WebSocket连接端点
        .route("/", get(websocket_handler))
        // 统计信息
        .route("/stats", get(get_websocket_stats))
}

/// WebSocket连接处理器
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    HandshakeUser(user): HandshakeUser,
) -> Response {
    let connection_id = format!("conn_{}", uuid::Uuid::new_v4());

    info!("WebSocket upgrade request from user: {} with connection: {}", user.id, connection_id);

    ws.on_upgrade(move |socket| async move {
        state
            .websocket_service
            .handle_connection(socket, user.id, connection_id)
            .await;
    })
}

/// 获取统计信息
async fn get_websocket_stats(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<ApiResponse<WebSocketStats>>> {
    Ok(Json(ApiResponse::success(state.websocket_service.get_stats())))
}
