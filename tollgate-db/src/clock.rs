//! RFC3339 timestamp helpers.
//!
//! All timestamps are stored as RFC3339 text with fixed microsecond
//! precision and a `Z` suffix, so lexicographic comparison in SQL equals
//! chronological comparison.

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp in the canonical stored form.
pub(crate) fn text(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The current instant in the canonical stored form.
pub(crate) fn now() -> String {
    text(Utc::now())
}
