//! Shared timestamp helpers.
//!
//! Every timestamp the crate writes is UTC, fixed width, millisecond precision
//! (`2024-05-01T12:00:00.123Z`). This matches the SQLite column default
//! `strftime('%Y-%m-%dT%H:%M:%fZ', 'now')`, so text order is time order.

use crate::core::error::{LabbookError, Result};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use std::sync::Mutex;

/// Source of "now" for every stamp the record layer writes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to pin timestamps in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }
}

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses the crate's own format, any RFC 3339 instant, or SQLite's
/// `CURRENT_TIMESTAMP` shape (`YYYY-MM-DD HH:MM:SS`, taken as UTC).
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(LabbookError::ValidationError(format!(
        "Invalid timestamp: '{}'",
        raw
    )))
}

/// Re-renders any accepted timestamp in the canonical stored format.
pub fn normalize_ts(raw: &str) -> Result<String> {
    parse_ts(raw).map(format_ts)
}

/// Next `updated_at` for a row whose current stamp is `previous`.
/// Always strictly greater than `previous`, even when the clock has not moved.
pub fn next_stamp(previous: Option<&str>, now: DateTime<Utc>) -> String {
    let now = truncate_millis(now);
    let floor = previous
        .and_then(|p| parse_ts(p).ok())
        .map(|p| p + Duration::milliseconds(1));
    match floor {
        Some(floor) if floor > now => format_ts(floor),
        _ => format_ts(now),
    }
}

fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let millis = ts.timestamp_millis();
    DateTime::from_timestamp_millis(millis).unwrap_or(ts)
}

/// `YYYY-MM-DD` for file names.
pub fn date_stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}
