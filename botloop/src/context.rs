//! The single mutable record owned by the scheduler.
//!
//! Tasks, guards and interrupts receive `&ScriptContext` and can only read it.
//! Every mutator is `pub(crate)` and called from `scheduler` alone, which keeps
//! phase changes, flag clearing and timer resets in one place.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::core::budget;
use crate::core::failures::FailureLedger;
use crate::core::types::Phase;

#[derive(Debug, Clone)]
pub struct ScriptContext<P> {
    phase: P,
    phase_entered: Instant,
    started_at: Instant,
    now: Instant,
    tick: u64,
    transitions: u64,
    flags: BTreeSet<String>,
    last_fired: BTreeMap<String, Instant>,
    cooldowns: BTreeMap<String, Instant>,
    task_failures: FailureLedger,
    interrupt_failures: FailureLedger,
    active_interrupt: Option<String>,
}

/// Phase snapshot taken before an interrupt runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Suspension<P> {
    pub phase: P,
    pub phase_entered: Instant,
    pub started: Instant,
}

impl<P: Phase> ScriptContext<P> {
    pub(crate) fn new(phase: P, now: Instant) -> Self {
        Self {
            phase,
            phase_entered: now,
            started_at: now,
            now,
            tick: 0,
            transitions: 0,
            flags: BTreeSet::new(),
            last_fired: BTreeMap::new(),
            cooldowns: BTreeMap::new(),
            task_failures: FailureLedger::default(),
            interrupt_failures: FailureLedger::default(),
            active_interrupt: None,
        }
    }

    pub fn phase(&self) -> P {
        self.phase
    }

    pub fn phase_entered(&self) -> Instant {
        self.phase_entered
    }

    /// Time spent in the current phase, excluding time spent in interrupts.
    pub fn phase_elapsed(&self) -> Duration {
        budget::elapsed(self.phase_entered, self.now)
    }

    /// Instant recorded at the start of the current tick.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn flag_pending(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn pending_flags(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }

    /// Last successful run of an interrupt, or script start if it never ran.
    pub fn last_fired(&self, interrupt: &str) -> Instant {
        self.last_fired
            .get(interrupt)
            .copied()
            .unwrap_or(self.started_at)
    }

    pub fn cooling_down(&self, task: &str) -> bool {
        self.cooldowns
            .get(task)
            .is_some_and(|until| self.now < *until)
    }

    pub fn task_failures(&self) -> &FailureLedger {
        &self.task_failures
    }

    pub fn interrupt_failures(&self) -> &FailureLedger {
        &self.interrupt_failures
    }

    /// Name of the interrupt currently running, if any.
    pub fn active_interrupt(&self) -> Option<&str> {
        self.active_interrupt.as_deref()
    }

    pub(crate) fn begin_tick(&mut self, now: Instant) {
        self.tick += 1;
        self.now = now;
        self.cooldowns.retain(|_, until| now < *until);
    }

    /// Enter `to`, reset the phase timer and the task streaks. Returns the old phase.
    pub(crate) fn enter_phase(&mut self, to: P, now: Instant) -> P {
        let from = self.phase;
        self.phase = to;
        self.phase_entered = now;
        self.transitions += 1;
        self.task_failures.clear();
        from
    }

    pub(crate) fn raise_flag(&mut self, flag: &str) {
        self.flags.insert(flag.to_string());
    }

    pub(crate) fn clear_flag(&mut self, flag: &str) {
        self.flags.remove(flag);
    }

    pub(crate) fn mark_fired(&mut self, interrupt: &str, at: Instant) {
        self.last_fired.insert(interrupt.to_string(), at);
    }

    pub(crate) fn start_cooldown(&mut self, task: &str, until: Instant) {
        self.cooldowns.insert(task.to_string(), until);
    }

    pub(crate) fn task_failures_mut(&mut self) -> &mut FailureLedger {
        &mut self.task_failures
    }

    pub(crate) fn interrupt_failures_mut(&mut self) -> &mut FailureLedger {
        &mut self.interrupt_failures
    }

    pub(crate) fn suspend(&mut self, interrupt: &str, started: Instant) -> Suspension<P> {
        self.active_interrupt = Some(interrupt.to_string());
        Suspension {
            phase: self.phase,
            phase_entered: self.phase_entered,
            started,
        }
    }

    /// Restore the snapshot phase; time spent in the interrupt does not count
    /// towards the phase timeout.
    pub(crate) fn resume(&mut self, suspension: Suspension<P>, finished: Instant) {
        let paused = budget::elapsed(suspension.started, finished);
        self.phase = suspension.phase;
        self.phase_entered = (suspension.phase_entered + paused).min(finished);
        self.active_interrupt = None;
    }
}
