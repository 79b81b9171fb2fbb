use crate::{
    error::{AppError, Result},
    models::{activity::Action, response::ApiResponse},
    services::auth::CurrentUser,
    state::AppState,
};
use axum::{extract::State, response::Json, routing::post, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use validator::Validate;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(record_activity))
}

/// What the acting user gets back. Fan-out results stay in the logs.
#[derive(Debug, Serialize)]
pub struct ActivityAck {
    pub recorded: bool,
}

/// Entry point for the like/comment/upload/tag/message handlers.
/// POST /api/activity
async fn record_activity(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(action): Json<Action>,
) -> Result<Json<ApiResponse<ActivityAck>>> {
    if action.actor().id != user.id {
        return Err(AppError::forbidden("Actions can only be recorded for yourself"));
    }
    // 关注必须走 /api/follows，才能只在首次关注时通知
    if matches!(action, Action::UserFollowed { .. }) {
        return Err(AppError::bad_request("Use /api/follows to follow a user"));
    }

    // 名字和头像以令牌为准
    let actor = user.actor();
    actor.validate()?;
    let action = action.with_actor(actor);

    debug!("Recording {} for user {}", action.notification_type(), user.id);
    let report = state.dispatcher.dispatch(&action).await;
    if !report.is_clean() {
        warn!(
            "Fan-out of {} by user {} was partial: {} store failure(s), {} push failure(s)",
            action.notification_type(),
            user.id,
            report.persistence_failures,
            report.broadcast_failures
        );
    }
    Ok(Json(ApiResponse::success(ActivityAck { recorded: true })))
}
