//! Consecutive failure bookkeeping and escalation thresholds.

use std::collections::BTreeMap;

/// Failures and retries recorded since the last success of one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Streak {
    pub fails: u32,
    pub retries: u32,
}

/// Bounds after which a streak escalates instead of retrying silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureLimits {
    pub max_consecutive_failures: u32,
    pub max_consecutive_retries: u32,
}

impl Default for FailureLimits {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            max_consecutive_retries: 25,
        }
    }
}

/// Returns true if a streak has reached either limit.
pub fn is_exhausted(streak: Streak, limits: &FailureLimits) -> bool {
    streak.fails >= limits.max_consecutive_failures
        || streak.retries >= limits.max_consecutive_retries
}

/// Per-name streaks, keyed by task or interrupt name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureLedger {
    streaks: BTreeMap<String, Streak>,
}

impl FailureLedger {
    pub fn get(&self, name: &str) -> Streak {
        self.streaks.get(name).copied().unwrap_or_default()
    }

    pub fn record_success(&mut self, name: &str) {
        self.streaks.remove(name);
    }

    pub fn record_fail(&mut self, name: &str) -> Streak {
        let streak = self.streaks.entry(name.to_string()).or_default();
        streak.fails += 1;
        *streak
    }

    pub fn record_retry(&mut self, name: &str) -> Streak {
        let streak = self.streaks.entry(name.to_string()).or_default();
        streak.retries += 1;
        *streak
    }

    pub fn clear(&mut self) {
        self.streaks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.streaks.is_empty()
    }
}
