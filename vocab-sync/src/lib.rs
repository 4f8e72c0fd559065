//! vocab-sync library interface
//!
//! Exposes the router, state and services for the binary and for integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::services::{EnrichmentPipeline, EnrichmentTrigger, EnrichmentWorker, IdentityResolver, SyncCoordinator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub config: Arc<ServiceConfig>,
    pub resolver: IdentityResolver,
    pub coordinator: SyncCoordinator,
    pub worker: EnrichmentWorker,
    /// Hand-off to the background enrichment task
    pub trigger: EnrichmentTrigger,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: ServiceConfig, pipeline: EnrichmentPipeline, trigger: EnrichmentTrigger) -> Self {
        Self {
            resolver: IdentityResolver::new(db.clone()),
            coordinator: SyncCoordinator::new(db.clone()),
            worker: EnrichmentWorker::new(db.clone(), pipeline),
            db,
            config: Arc::new(config),
            trigger,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::sync_routes())
        .merge(api::lookup_routes())
        .merge(api::enrich_routes())
        .merge(api::card_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
