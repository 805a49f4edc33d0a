//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Default artifact version: the current date as `YYYY-MM-DD`
pub fn today_version() -> String {
    now().format("%Y-%m-%d").to_string()
}

/// Convert fractional hours into a chrono duration (millisecond precision)
pub fn hours_to_duration(hours: f64) -> chrono::Duration {
    chrono::Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}
