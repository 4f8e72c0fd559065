//! Bearer token extractors
//!
//! Handlers take `AuthUser` to require a user token. `/enrich/request` takes
//! `Caller`, which also accepts the configured service token.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use uuid::Uuid;
use vocab_common::api::auth::lookup_token_user;
use vocab_common::api::{matches_service_token, parse_bearer};

use crate::error::ApiError;
use crate::AppState;

/// Authenticated end user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

/// Either an end user or the trusted service caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    User(Uuid),
    Service,
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts.headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    Ok(parse_bearer(header)?)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let user_id = lookup_token_user(&state.db, token).await?;
        Ok(AuthUser(user_id))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        if matches_service_token(token, state.config.service_token.as_deref()) {
            return Ok(Caller::Service);
        }
        let user_id = lookup_token_user(&state.db, token).await?;
        Ok(Caller::User(user_id))
    }
}
