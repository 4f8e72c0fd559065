//! API authentication via bearer tokens
//!
//! Tokens are issued by the external auth system. This service only verifies
//! them: the SHA-256 digest of the presented token is looked up in the
//! `api_tokens` table, which maps digests to user ids. Raw tokens are never stored.
//!
//! # Pure Functions
//!
//! Header parsing and hashing are pure. The lookup is a single sqlx query.
//! HTTP framework glue (axum extractors) lives in the service crate.

use sha2::{Digest, Sha256};

#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;
#[cfg(feature = "sqlx")]
use uuid::Uuid;

// ========================================
// Error Types
// ========================================

/// Authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuthError {
    /// No Authorization header present
    MissingToken,

    /// Header present but not `Bearer <token>`
    MalformedHeader,

    /// Token digest not found, or token expired
    InvalidToken,

    /// Database error during lookup
    DatabaseError(String),
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::MissingToken => write!(f, "Missing bearer token"),
            ApiAuthError::MalformedHeader => write!(f, "Malformed Authorization header"),
            ApiAuthError::InvalidToken => write!(f, "Invalid or expired token"),
            ApiAuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for ApiAuthError {}

// ========================================
// Header Parsing
// ========================================

/// Extract the token from an `Authorization` header value
///
/// # Examples
///
/// ```
/// use vocab_common::api::auth::parse_bearer;
///
/// assert_eq!(parse_bearer(Some("Bearer abc123")).unwrap(), "abc123");
/// assert!(parse_bearer(Some("Basic abc123")).is_err());
/// assert!(parse_bearer(None).is_err());
/// ```
pub fn parse_bearer(header: Option<&str>) -> Result<&str, ApiAuthError> {
    let header = header.ok_or(ApiAuthError::MissingToken)?;
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(ApiAuthError::MalformedHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ApiAuthError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(ApiAuthError::MalformedHeader);
    }
    Ok(token)
}

// ========================================
// Hashing
// ========================================

/// SHA-256 hex digest of a token (64 lowercase hex characters)
///
/// # Examples
///
/// ```
/// use vocab_common::api::auth::hash_token;
///
/// let digest = hash_token("secret-token");
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, hash_token("secret-token"));
/// ```
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare a presented token with the configured service token
///
/// Compares digests so the comparison time does not depend on the
/// position of the first differing byte of the raw token.
pub fn matches_service_token(presented: &str, configured: Option<&str>) -> bool {
    match configured {
        Some(expected) if !expected.is_empty() => {
            let a = hash_token(presented);
            let b = hash_token(expected);
            a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
        }
        _ => false,
    }
}

// ========================================
// Token Lookup
// ========================================

/// Resolve a bearer token to its user id
///
/// Tokens with an `expires_at` in the past are rejected.
#[cfg(feature = "sqlx")]
pub async fn lookup_token_user(db: &SqlitePool, token: &str) -> Result<Uuid, ApiAuthError> {
    let digest = hash_token(token);
    let now = crate::time::now_timestamp();

    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT user_id FROM api_tokens
        WHERE token_hash = ?
          AND (expires_at IS NULL OR expires_at > ?)
        "#,
    )
    .bind(&digest)
    .bind(&now)
    .fetch_optional(db)
    .await
    .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    let (user_id,) = row.ok_or(ApiAuthError::InvalidToken)?;
    Uuid::parse_str(&user_id)
        .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid user id in api_tokens: {}", e)))
}

/// Register a token for a user (used by tooling and tests; issuing belongs to the auth system)
#[cfg(feature = "sqlx")]
pub async fn register_token(
    db: &SqlitePool,
    token: &str,
    user_id: Uuid,
    expires_at: Option<&str>,
) -> crate::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO api_tokens (token_hash, user_id, expires_at, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(token_hash) DO UPDATE SET
            user_id = excluded.user_id,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(hash_token(token))
    .bind(user_id.to_string())
    .bind(expires_at)
    .bind(crate::time::now_timestamp())
    .execute(db)
    .await?;
    Ok(())
}
