//! HTTP API handlers for vocab-sync

pub mod auth;
pub mod cards;
pub mod enrich;
pub mod health;
pub mod lookup;
pub mod sync;

pub use auth::{AuthUser, Caller};
pub use cards::card_routes;
pub use enrich::enrich_routes;
pub use health::health_routes;
pub use lookup::lookup_routes;
pub use sync::sync_routes;
