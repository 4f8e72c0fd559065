//! Enrichment endpoints
//!
//! `POST /enrich/request` runs a processing pass synchronously. End users may
//! name rows or let the worker pick their oldest un-enriched ones; the service
//! caller must name rows and acts for whoever owns the first of them.
//! `force_re_enrich` retries rows that gave up and refreshes stale entries.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::{AuthUser, Caller};
use crate::db::vocabulary;
use crate::error::{ApiError, ApiResult};
use crate::services::{normalize_language_code, BufferStatus, ProcessSummary, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EnrichRequest {
    #[serde(default)]
    pub native_language_code: Option<String>,
    #[serde(default)]
    pub vocabulary_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub force_re_enrich: bool,
}

#[derive(Debug, Serialize)]
pub struct EnrichResponse {
    #[serde(flatten)]
    pub summary: ProcessSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_status: Option<BufferStatus>,
}

fn language_code(raw: &str) -> Result<String, ApiError> {
    normalize_language_code(raw).map_err(|_| ApiError::BadRequest(format!("invalid native_language_code '{}'", raw)))
}

/// POST /enrich/request
pub async fn request_enrichment(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<EnrichRequest>,
) -> ApiResult<Json<EnrichResponse>> {
    let ids = request.vocabulary_ids.unwrap_or_default();

    match caller {
        Caller::Service => {
            let first = *ids
                .first()
                .ok_or_else(|| ApiError::BadRequest("vocabulary_ids is required".to_string()))?;
            let owner = vocabulary::load_vocabulary(&state.db, first)
                .await?
                .ok_or_else(|| ApiError::NotFound("Vocabulary entry not found".to_string()))?
                .user_id;

            let native_language = match request.native_language_code.as_deref() {
                Some(code) => language_code(code)?,
                None => state.config.default_native_language.clone(),
            };
            let batch_size = request.batch_size.unwrap_or(1).min(ids.len());

            let summary = state
                .worker
                .process_ids(owner, &ids, &native_language, batch_size, request.force_re_enrich)
                .await?;
            Ok(Json(EnrichResponse {
                summary,
                buffer_status: None,
            }))
        }
        Caller::User(user_id) => {
            let native_language = request
                .native_language_code
                .as_deref()
                .filter(|code| !code.trim().is_empty())
                .ok_or_else(|| ApiError::BadRequest("native_language_code is required".to_string()))
                .and_then(language_code)?;
            let batch_size = request.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).min(MAX_BATCH_SIZE);

            let summary = if ids.is_empty() {
                state
                    .worker
                    .process_unenriched(user_id, &native_language, batch_size, request.force_re_enrich)
                    .await?
            } else {
                state
                    .worker
                    .process_ids(user_id, &ids, &native_language, batch_size, request.force_re_enrich)
                    .await?
            };
            let buffer_status = state.worker.buffer_status(user_id).await?;

            Ok(Json(EnrichResponse {
                summary,
                buffer_status: Some(buffer_status),
            }))
        }
    }
}

/// GET /enrich/status
pub async fn enrichment_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<BufferStatus>> {
    Ok(Json(state.worker.buffer_status(user_id).await?))
}

/// Build enrichment routes
pub fn enrich_routes() -> Router<AppState> {
    Router::new()
        .route("/enrich/request", post(request_enrichment))
        .route("/enrich/status", get(enrichment_status))
}
