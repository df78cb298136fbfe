//! Condition-wait: the single blocking synchronization primitive.
//!
//! Actions against the environment are confirmed asynchronously (an item shows
//! up in the inventory a few hundred milliseconds after "withdraw"). Tasks
//! bridge that gap with [`wait_until`] instead of ad hoc sleep loops.

use std::time::Duration;

use tracing::trace;

use crate::io::clock::Clock;

/// Poll interval and attempt bound for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSpec {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl WaitSpec {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn millis(interval_ms: u64, max_attempts: u32) -> Self {
        Self::new(Duration::from_millis(interval_ms), max_attempts)
    }

    /// Upper bound on the time a wait with this spec can block.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

/// Poll `predicate` until it returns true or `max_attempts` polls have run.
///
/// The first poll happens immediately and the clock sleeps `interval` only
/// between polls, so a predicate that turns true on the last allowed poll
/// still yields `true`, and the call never blocks for the full
/// `interval * max_attempts`. With `max_attempts == 0` nothing is polled.
pub fn wait_until(
    clock: &dyn Clock,
    spec: WaitSpec,
    mut predicate: impl FnMut() -> bool,
) -> bool {
    for attempt in 1..=spec.max_attempts {
        if predicate() {
            trace!(attempt, "wait condition met");
            return true;
        }
        if attempt < spec.max_attempts {
            clock.sleep(spec.interval);
        }
    }
    trace!(attempts = spec.max_attempts, "wait condition timed out");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualClock;

    #[test]
    fn returns_immediately_when_already_true() {
        let clock = ManualClock::new();
        let start = clock.now();
        assert!(wait_until(&clock, WaitSpec::millis(100, 5), || true));
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn returns_true_when_predicate_flips_on_last_poll() {
        let clock = ManualClock::new();
        let start = clock.now();
        let mut polls = 0;
        let met = wait_until(&clock, WaitSpec::millis(100, 5), || {
            polls += 1;
            polls == 5
        });
        assert!(met);
        assert_eq!(polls, 5);
        let waited = clock.now() - start;
        assert_eq!(waited, Duration::from_millis(400));
        assert!(waited < WaitSpec::millis(100, 5).budget());
    }

    #[test]
    fn returns_false_after_exactly_max_attempts() {
        let clock = ManualClock::new();
        let start = clock.now();
        let mut polls = 0;
        let met = wait_until(&clock, WaitSpec::millis(50, 4), || {
            polls += 1;
            false
        });
        assert!(!met);
        assert_eq!(polls, 4);
        assert!(clock.now() - start <= WaitSpec::millis(50, 4).budget());
    }

    #[test]
    fn zero_attempts_never_polls() {
        let clock = ManualClock::new();
        let mut polled = false;
        assert!(!wait_until(&clock, WaitSpec::millis(50, 0), || {
            polled = true;
            true
        }));
        assert!(!polled);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn predicate_observes_time_passing() {
        let clock = ManualClock::new();
        let ready_at = clock.now() + Duration::from_millis(250);
        let met = wait_until(&clock, WaitSpec::millis(100, 10), || clock.now() >= ready_at);
        assert!(met);
        assert_eq!(clock.sleeps().len(), 3);
    }
}
