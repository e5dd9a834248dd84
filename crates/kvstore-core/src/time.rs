use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds, used for expiry comparisons
/// throughout the keyspace and expiry index.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

/// Sentinel expiry meaning "never expires" — the maximum representable
/// signed 64-bit integer, as spec'd.
pub const NEVER: i64 = i64::MAX;
