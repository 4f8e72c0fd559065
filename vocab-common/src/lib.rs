//! # Vocab Common Library
//!
//! Shared code for the vocabulary sync service and its tooling:
//! - Error type shared by all crates
//! - Configuration loading and root folder resolution
//! - SQLite schema initialization
//! - API token hashing, stage mapping and shared API types
//! - Timestamp and text normalization helpers

pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod text;
pub mod time;

pub use error::{Error, Result};
