//! API module for shared HTTP API functionality
//!
//! # Design Principle
//!
//! This module contains ONLY:
//! - Pure functions (no HTTP framework dependencies)
//! - Database operations (via sqlx)
//! - Shared types
//!
//! The service crate wraps these with axum extractors.

pub mod auth;
pub mod types;

pub use auth::{hash_token, matches_service_token, parse_bearer, ApiAuthError};
pub use types::{CardProgress, CardState, ErrorResponse, Stage};
