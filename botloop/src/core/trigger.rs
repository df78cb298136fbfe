//! Interrupt activation rules.
//!
//! An interrupt is active when its flag is pending OR its timer has expired.
//! Both checks are pure so the scheduler can evaluate them every tick.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::budget::timed_out;

/// What makes an interrupt eligible to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    flag: Option<String>,
    every: Option<Duration>,
}

impl Trigger {
    /// Activate while `flag` is pending (raised by an event rule).
    pub fn on_flag(flag: impl Into<String>) -> Self {
        Self {
            flag: Some(flag.into()),
            every: None,
        }
    }

    /// Activate each time `interval` elapses since the last success.
    pub fn every(interval: Duration) -> Self {
        Self {
            flag: None,
            every: Some(interval),
        }
    }

    /// Additionally activate on a timer.
    pub fn or_every(mut self, interval: Duration) -> Self {
        self.every = Some(interval);
        self
    }

    pub fn flag(&self) -> Option<&str> {
        self.flag.as_deref()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.every
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.flag, self.every) {
            (Some(flag), Some(every)) => write!(f, "flag={flag} or every {}ms", every.as_millis()),
            (Some(flag), None) => write!(f, "flag={flag}"),
            (None, Some(every)) => write!(f, "every {}ms", every.as_millis()),
            (None, None) => write!(f, "never"),
        }
    }
}

/// Which half of the trigger fired. Flag wins when both hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Flag,
    Timer,
}

/// Decide whether a trigger is active at `now`.
pub fn activation(
    trigger: &Trigger,
    flag_pending: bool,
    last_fired: Instant,
    now: Instant,
) -> Option<Activation> {
    if trigger.flag.is_some() && flag_pending {
        return Some(Activation::Flag);
    }
    match trigger.every {
        Some(every) if timed_out(last_fired, every, now) => Some(Activation::Timer),
        _ => None,
    }
}
