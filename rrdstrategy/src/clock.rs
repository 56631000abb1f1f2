//! Wall-clock helpers shared by the strategy, the bundled engine and the CLI.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)] // epoch millis fit in i64 for the foreseeable future
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// Current time in seconds since the Unix epoch.
pub fn now_secs() -> i64 {
    now_millis() / 1000
}
