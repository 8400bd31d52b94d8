//! Millisecond-epoch timestamp helpers.
//!
//! The schema stores all timestamps as `INTEGER` (milliseconds since the
//! Unix epoch) rather than via rusqlite's `chrono` feature, so conversions
//! go through this module rather than being scattered across query sites.

use chrono::{DateTime, TimeZone, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
