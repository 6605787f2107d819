//! Staleness predicates
//!
//! Pure functions over committed feed timestamps; no state of their own.

use chrono::{DateTime, Duration, Utc};

/// True when no commit has ever occurred, or the last commit is older than
/// the threshold (strict `>`; a feed aged exactly at the threshold is fresh).
pub fn is_stale(
    last_good_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    match last_good_at {
        None => true,
        Some(at) => now - at > threshold,
    }
}

/// Staleness of a single observation, same policy as the primary feed.
pub fn quote_is_stale(observed_at: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    now - observed_at > threshold
}
