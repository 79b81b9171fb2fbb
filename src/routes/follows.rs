use crate::{
    error::{AppError, Result},
    models::{response::ApiResponse, user::UserId},
    services::auth::CurrentUser,
    state::AppState,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:user_id", post(follow_user).delete(unfollow_user))
        .route("/:user_id/followers", get(get_followers))
}

fn parse_user_id(raw: &str) -> Result<UserId> {
    raw.parse()
        .map_err(|_| AppError::bad_request("Invalid user id"))
}

/// 关注用户
/// POST /api/follows/:user_id
async fn follow_user(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<Value>>> {
    let following_id = parse_user_id(&user_id)?;
    debug!("User {} following user {}", user.id, following_id);

    let outcome = state
        .follow_service
        .follow(user.actor(), following_id)
        .await?;

    Ok(Json(ApiResponse::success(json!({ "status": outcome }))))
}

/// 取消关注用户
/// DELETE /api/follows/:user_id
async fn unfollow_user(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<Value>>> {
    let following_id = parse_user_id(&user_id)?;
    debug!("User {} unfollowing user {}", user.id, following_id);

    let outcome = state.follow_service.unfollow(user.id, following_id).await?;

    Ok(Json(ApiResponse::success(json!({ "status": outcome }))))
}

/// 获取用户的关注者列表
/// GET /api/follows/:user_id/followers
async fn get_followers(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<UserId>>>> {
    let user_id = parse_user_id(&user_id)?;
    let followers = state.follow_service.followers(user_id).await?;
    Ok(Json(ApiResponse::success(followers)))
}
