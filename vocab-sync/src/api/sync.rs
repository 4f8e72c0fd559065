//! Replication endpoints
//!
//! `POST /sync/push` answers 200 when every change applied or was rejected,
//! 409 when at least one update was stale. The body has the same shape either
//! way.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::info;

use super::auth::AuthUser;
use crate::error::ApiResult;
use crate::models::{PullRequest, PullResponse, PushRequest, PushResponse};
use crate::AppState;

/// POST /sync/push
pub async fn push(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<PushRequest>,
) -> ApiResult<(StatusCode, Json<PushResponse>)> {
    info!(user_id = %user_id, changes = request.changes.len(), "Sync push");

    let outcome = state.coordinator.push(user_id, request.changes).await?;

    state.trigger.request(
        user_id,
        outcome.new_vocabulary,
        &state.config.default_native_language,
    );

    let status = if outcome.response.has_conflicts() {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.response)))
}

/// POST /sync/pull
pub async fn pull(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    request: Option<Json<PullRequest>>,
) -> ApiResult<Json<PullResponse>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let response = state
        .coordinator
        .pull(user_id, request.last_synced_at.as_deref())
        .await?;
    Ok(Json(response))
}

/// Build sync routes
pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/sync/push", post(push))
        .route("/sync/pull", post(pull))
}
