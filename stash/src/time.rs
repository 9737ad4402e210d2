use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Entry timestamps are persisted to disk, so they are wall-clock based rather
// than relative to a process-local `Instant`.

/// The current time as milliseconds since the Unix epoch.
#[inline]
pub(crate) fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

/// Converts a `Duration` into whole milliseconds, saturating at `u64::MAX`.
#[inline]
pub(crate) fn duration_millis(duration: Duration) -> u64 {
  u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
