//! Shared deterministic types for the scheduling core.
//!
//! These types define stable contracts between the scheduler, tasks and
//! interrupts. They do not depend on the environment or on wall-clock time.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// A closed set of named phases for one script.
///
/// Implementors are plain enums. `Display` must produce the stable lowercase
/// name used in configuration files and logs.
pub trait Phase: Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + 'static {
    /// Every phase, in declaration order.
    const ALL: &'static [Self];

    /// Look up a phase by its display name.
    fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|phase| phase.to_string() == name)
    }
}

/// Explicit scheduling priority. Lower values are evaluated first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u32);

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of running a phase task once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<P> {
    /// The action completed; the phase is unchanged.
    Success,
    /// Expected, bounded-retry condition (e.g. target not ready yet).
    Retry(String),
    /// The action failed unexpectedly; the next tick re-evaluates guards.
    Fail(String),
    /// The action completed and requests a move to another phase.
    TransitionTo(P),
    /// A precondition the task cannot recover from locally is missing.
    Fatal(String),
}

impl<P> Outcome<P> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success => OutcomeKind::Success,
            Outcome::Retry(_) => OutcomeKind::Retry,
            Outcome::Fail(_) => OutcomeKind::Fail,
            Outcome::TransitionTo(_) => OutcomeKind::Transition,
            Outcome::Fatal(_) => OutcomeKind::Fatal,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Retry(reason) | Outcome::Fail(reason) | Outcome::Fatal(reason) => {
                Some(reason)
            }
            Outcome::Success | Outcome::TransitionTo(_) => None,
        }
    }
}

/// Result of running an interrupt once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Clears the triggering flag and re-arms the timer.
    Success,
    /// Keeps the trigger pending; expected to succeed on a later tick.
    Retry(String),
    /// Keeps the trigger pending; counted towards the failure limit.
    Fail(String),
    Fatal(String),
}

impl InterruptOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            InterruptOutcome::Success => OutcomeKind::Success,
            InterruptOutcome::Retry(_) => OutcomeKind::Retry,
            InterruptOutcome::Fail(_) => OutcomeKind::Fail,
            InterruptOutcome::Fatal(_) => OutcomeKind::Fatal,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            InterruptOutcome::Success => None,
            InterruptOutcome::Retry(reason)
            | InterruptOutcome::Fail(reason)
            | InterruptOutcome::Fatal(reason) => Some(reason),
        }
    }
}

/// Outcome classification without payload, used in reports and the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Retry,
    Fail,
    Transition,
    Fatal,
}

/// Why the scheduler changed phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionCause {
    /// A task returned `TransitionTo`.
    Task { task: String },
    /// The phase exceeded its configured time bound.
    Timeout,
    /// An event rule with a phase action matched a message.
    Event { pattern: String },
    /// A task exhausted its failure or retry streak.
    Escalation { task: String },
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionCause::Task { task } => write!(f, "task {task}"),
            TransitionCause::Timeout => write!(f, "timeout"),
            TransitionCause::Event { pattern } => write!(f, "event /{pattern}/"),
            TransitionCause::Escalation { task } => write!(f, "escalation from {task}"),
        }
    }
}

/// A phase change applied during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<P> {
    pub from: P,
    pub to: P,
    pub cause: TransitionCause,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Light {
        Red,
        Green,
    }

    impl fmt::Display for Light {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Light::Red => write!(f, "red"),
                Light::Green => write!(f, "green"),
            }
        }
    }

    impl Phase for Light {
        const ALL: &'static [Self] = &[Light::Red, Light::Green];
    }

    #[test]
    fn parse_matches_display_name() {
        assert_eq!(Light::parse("green"), Some(Light::Green));
        assert_eq!(Light::parse("Green"), None);
    }

    #[test]
    fn outcome_reason_only_for_failures() {
        let retry: Outcome<Light> = Outcome::Retry("busy".to_string());
        assert_eq!(retry.reason(), Some("busy"));
        assert_eq!(retry.kind(), OutcomeKind::Retry);
        assert_eq!(Outcome::TransitionTo(Light::Red).reason(), None);
    }
}
