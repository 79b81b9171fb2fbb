use crate::{error::Result, services::auth::CurrentUser, state::AppState};
use axum::{extract::State, response::Json, routing::post, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct ChannelAuthRequest {
    pub socket_id: String,
    pub channel_name: String,
}

#[derive(Debug, Serialize)]
pub struct ChannelAuthResponse {
    pub auth: String,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/auth", post(authorize_channel))
}

/// Subscription handshake for pusher-style clients.
/// POST /broadcasting/auth
async fn authorize_channel(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(request): Json<ChannelAuthRequest>,
) -> Result<Json<ChannelAuthResponse>> {
    debug!("User {} requesting channel {}", user.id, request.channel_name);

    let auth = state
        .channel_authorizer
        .sign(user.id, &request.socket_id, &request.channel_name)?;

    Ok(Json(ChannelAuthResponse { auth }))
}
