//! Shared time budget helpers for phase timeouts and interrupt timers.

use std::time::{Duration, Instant};

/// Time elapsed from `since` to `now`, saturating at zero.
pub fn elapsed(since: Instant, now: Instant) -> Duration {
    now.saturating_duration_since(since)
}

/// True once at least `bound` has elapsed since `since`.
pub fn timed_out(since: Instant, bound: Duration, now: Instant) -> bool {
    elapsed(since, now) >= bound
}
