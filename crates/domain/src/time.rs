//! Time and timestamp helpers.
//!
//! Program time values (timer values, threshold times, light frequencies)
//! are integers in milliseconds.

use chrono::{DateTime, Utc};

/// UTC timestamp used for event log records.
pub type Timestamp = DateTime<Utc>;

/// One millisecond, in program time units.
pub const MILLISECOND: i64 = 1;
/// One second, in program time units.
pub const SECOND: i64 = 1000 * MILLISECOND;
/// One minute, in program time units.
pub const MINUTE: i64 = 60 * SECOND;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}
