//! Task and interrupt contracts.
//!
//! A script is a closed set of task kinds (usually one enum per script) that
//! implement [`Task`] or [`Interrupt`]. The scheduler owns the boxed instances
//! and is the only caller of `is_applicable` and `run`.

use std::time::{Duration, Instant};

use crate::context::ScriptContext;
use crate::core::trigger::Trigger;
use crate::core::types::{InterruptOutcome, Outcome, Phase, Priority};
use crate::io::clock::Clock;
use crate::io::jitter::Jitter;
use crate::wait::{WaitSpec, wait_until};

/// Everything a running task or interrupt may use besides the environment.
pub struct RunCtx<'a, P> {
    script: &'a ScriptContext<P>,
    clock: &'a dyn Clock,
    jitter: &'a mut Jitter,
    wait: WaitSpec,
}

impl<'a, P: Phase> RunCtx<'a, P> {
    pub fn new(
        script: &'a ScriptContext<P>,
        clock: &'a dyn Clock,
        jitter: &'a mut Jitter,
        wait: WaitSpec,
    ) -> Self {
        Self {
            script,
            clock,
            jitter,
            wait,
        }
    }

    pub fn script(&self) -> &ScriptContext<P> {
        self.script
    }

    /// Live clock reading (advances while the task blocks).
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock
    }

    /// Default wait tuning from `[engine.wait]`.
    pub fn default_wait(&self) -> WaitSpec {
        self.wait
    }

    /// Condition-wait with the configured default spec.
    pub fn wait_until(&self, predicate: impl FnMut() -> bool) -> bool {
        wait_until(self.clock, self.wait, predicate)
    }

    /// Condition-wait with a scenario-specific spec.
    pub fn wait_until_with(&self, spec: WaitSpec, predicate: impl FnMut() -> bool) -> bool {
        wait_until(self.clock, spec, predicate)
    }

    /// Humanizing delay between two interactions.
    pub fn pause(&mut self) -> Duration {
        self.jitter.pause(self.clock)
    }
}

/// A guarded, single-shot unit of behavior bound to one phase.
pub trait Task<E: ?Sized, P: Phase> {
    /// Unique within the script; used in logs, the journal and failure streaks.
    fn name(&self) -> &str;

    fn priority(&self) -> Priority;

    /// Read-only and non-blocking.
    fn is_applicable(&self, env: &E, ctx: &ScriptContext<P>) -> bool;

    /// May block through `cx.wait_until`. Must re-check any precondition that
    /// can go stale between the guard and the action.
    fn run(&mut self, env: &mut E, cx: &mut RunCtx<'_, P>) -> Outcome<P>;

    /// Backoff after a successful run before the guard is consulted again.
    fn cooldown(&self) -> Option<Duration> {
        None
    }
}

/// A highest-priority task evaluated every tick regardless of phase.
pub trait Interrupt<E: ?Sized, P: Phase> {
    fn name(&self) -> &str;

    fn priority(&self) -> Priority;

    fn trigger(&self) -> &Trigger;

    /// Extra cheap check on top of the trigger.
    fn is_applicable(&self, _env: &E, _ctx: &ScriptContext<P>) -> bool {
        true
    }

    /// Bounded action. The scheduler restores the preempted phase afterwards.
    fn run(&mut self, env: &mut E, cx: &mut RunCtx<'_, P>) -> InterruptOutcome;
}
