//! Learning card maintenance

use axum::{extract::State, routing::post, Json, Router};

use super::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::CardBackfill;
use crate::AppState;

/// POST /cards/process
///
/// Creates the missing card of every active vocabulary row of the caller.
pub async fn process_cards(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> ApiResult<Json<CardBackfill>> {
    Ok(Json(state.resolver.backfill_cards(user_id).await?))
}

/// Build card routes
pub fn card_routes() -> Router<AppState> {
    Router::new().route("/cards/process", post(process_cards))
}
