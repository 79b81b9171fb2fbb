use crate::{
    error::{AppError, Result},
    models::{
        notification::{ListQuery, Notification, NotificationPage, UnreadQuery},
        response::ApiResponse,
    },
    services::auth::CurrentUser,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread", get(unread_notifications))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(mark_all_read))
        .route("/:id/read", post(mark_read))
}

/// 获取通知列表
/// GET /api/notifications?per_page=&page=&cursor=
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<NotificationPage>>> {
    let page = state.notification_service.list(user.id, query).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /api/notifications/unread?limit=
async fn unread_notifications(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<UnreadQuery>,
) -> Result<Json<ApiResponse<Vec<Notification>>>> {
    let unread = state.notification_service.unread(user.id, query).await?;
    Ok(Json(ApiResponse::success(unread)))
}

/// GET /api/notifications/unread-count
async fn unread_count(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Value>>> {
    let count = state.notification_service.unread_count(user.id).await?;
    Ok(Json(ApiResponse::success(json!({ "count": count }))))
}

/// 标记通知为已读
/// POST /api/notifications/:id/read
async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Notification>>> {
    debug!("User {} marking notification {} read", user.id, id);

    // 非法 id 与不存在的通知同样处理
    let id = Uuid::parse_str(&id).map_err(|_| AppError::not_found("Notification"))?;
    let notification = state.notification_service.mark_read(user.id, id).await?;
    Ok(Json(ApiResponse::success(notification)))
}

/// POST /api/notifications/read-all
async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Value>>> {
    let updated = state.notification_service.mark_all_read(user.id).await?;
    Ok(Json(ApiResponse::success_with_message(
        json!({ "updated": updated }),
        "All notifications marked as read".to_string(),
    )))
}
