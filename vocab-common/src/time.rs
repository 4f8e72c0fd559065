//! Timestamp utilities
//!
//! Every timestamp the service stores is RFC 3339 UTC with millisecond precision
//! and a `Z` suffix, so string comparison in SQL matches chronological order.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp in the canonical storage format
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in the canonical storage format
pub fn now_timestamp() -> String {
    format_timestamp(now())
}

/// The Unix epoch, used as the watermark for a full pull
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

/// Parse a client-supplied RFC 3339 timestamp
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", value, e)))
}
