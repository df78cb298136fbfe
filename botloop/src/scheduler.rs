//! Orchestration for a single cooperative tick.
//!
//! Per tick, in order: drain events, apply the phase timeout, then run exactly
//! one action (the first active interrupt, else the first applicable task of
//! the current phase) or idle. The scheduler is the only writer of the
//! [`ScriptContext`].

use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::context::ScriptContext;
use crate::core::budget;
use crate::core::failures::{FailureLimits, Streak, is_exhausted};
use crate::core::selector::first_applicable;
use crate::core::trigger::{Activation, activation};
use crate::core::types::{
    InterruptOutcome, Outcome, OutcomeKind, Phase, Transition, TransitionCause,
};
use crate::io::clock::Clock;
use crate::io::config::{BotConfig, EngineConfig, EscalationPolicy};
use crate::io::environment::Environment;
use crate::io::events::{EventAction, EventQueue, EventSender, route};
use crate::io::jitter::Jitter;
use crate::io::tick_log::{TickJournal, TickRecord};
use crate::script::Script;
use crate::task::RunCtx;
use crate::wait::WaitSpec;

/// Engine knobs that are not part of any script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerPolicy {
    /// Bounded sleep when nothing is applicable.
    pub idle: Duration,
    pub limits: FailureLimits,
    pub escalation: EscalationPolicy,
    /// Default condition-wait spec handed to tasks.
    pub wait: WaitSpec,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SchedulerPolicy {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            idle: cfg.idle(),
            limits: cfg.limits(),
            escalation: cfg.escalation,
            wait: cfg.wait.spec(),
        }
    }
}

/// The single action a tick performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    Interrupt {
        name: String,
        activation: Activation,
        outcome: OutcomeKind,
        detail: Option<String>,
    },
    Task {
        name: String,
        outcome: OutcomeKind,
        detail: Option<String>,
    },
    Idle,
}

impl TickAction {
    pub fn name(&self) -> Option<&str> {
        match self {
            TickAction::Interrupt { name, .. } | TickAction::Task { name, .. } => Some(name),
            TickAction::Idle => None,
        }
    }

    pub fn outcome(&self) -> Option<OutcomeKind> {
        match self {
            TickAction::Interrupt { outcome, .. } | TickAction::Task { outcome, .. } => {
                Some(*outcome)
            }
            TickAction::Idle => None,
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport<P> {
    pub tick: u64,
    pub phase_before: P,
    pub phase_after: P,
    pub action: TickAction,
    /// Phase changes applied this tick, in order.
    pub transitions: Vec<Transition<P>>,
}

/// Unrecoverable condition; the bot must stop rather than loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalStop {
    pub script: String,
    pub phase: String,
    pub source: Option<String>,
    pub reason: String,
}

impl fmt::Display for FatalStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script {} stopped in phase {}", self.script, self.phase)?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        write!(f, ": {}", self.reason)
    }
}

impl Error for FatalStop {}

/// Drives one [`Script`] against an environment, one tick at a time.
pub struct Scheduler<E: ?Sized, P: Phase, C: Clock> {
    script: Script<E, P>,
    ctx: ScriptContext<P>,
    clock: C,
    jitter: Jitter,
    policy: SchedulerPolicy,
    events: EventQueue,
    journal: Option<TickJournal>,
}

impl<E: Environment + ?Sized, P: Phase, C: Clock> Scheduler<E, P, C> {
    /// Subscribe to environment events and pick the initial phase.
    pub fn start(
        script: Script<E, P>,
        env: &mut E,
        clock: C,
        jitter: Jitter,
        policy: SchedulerPolicy,
    ) -> Self {
        let events = EventQueue::new();
        env.subscribe(events.sender());
        let phase = script.initial_phase(env);
        let ctx = ScriptContext::new(phase, clock.now());
        info!(script = %script.name(), phase = %phase, "script started");
        Self {
            script,
            ctx,
            clock,
            jitter,
            policy,
            events,
            journal: None,
        }
    }

    /// Start with policy, jitter and journal taken from `cfg`.
    pub fn from_config(
        script: Script<E, P>,
        env: &mut E,
        clock: C,
        cfg: &BotConfig,
    ) -> Result<Self> {
        cfg.validate().context("invalid bot config")?;
        let scheduler = Self::start(
            script,
            env,
            clock,
            Jitter::from_config(&cfg.jitter),
            SchedulerPolicy::from_config(&cfg.engine),
        );
        match &cfg.engine.journal_path {
            Some(path) => Ok(scheduler.with_journal(TickJournal::open(path)?)),
            None => Ok(scheduler),
        }
    }
}

impl<E: ?Sized, P: Phase, C: Clock> Scheduler<E, P, C> {
    pub fn with_journal(mut self, journal: TickJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn context(&self) -> &ScriptContext<P> {
        &self.ctx
    }

    pub fn script(&self) -> &Script<E, P> {
        &self.script
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Extra producer handle for hosts that deliver events themselves.
    pub fn event_sender(&self) -> EventSender {
        self.events.sender()
    }

    /// Ask the script whether halting now leaves no transaction half-done.
    pub fn safe_to_stop(&self, env: &E) -> bool {
        self.ctx.active_interrupt().is_none() && self.script.safe_to_stop(env, &self.ctx)
    }

    /// Run one tick. Returns `Err` wrapping [`FatalStop`] on fatal conditions.
    pub fn tick(&mut self, env: &mut E) -> Result<TickReport<P>> {
        let now = self.clock.now();
        self.ctx.begin_tick(now);
        let phase_before = self.ctx.phase();
        let mut transitions = Vec::new();

        self.route_events(now, &mut transitions);
        self.apply_phase_timeout(now, &mut transitions);

        let mut fatal = None;
        let action = if let Some((idx, fired)) = self.select_interrupt(env) {
            self.run_interrupt(idx, fired, env, &mut fatal)
        } else if let Some(idx) = self.select_task(env)? {
            self.run_task(idx, env, &mut transitions, &mut fatal)?
        } else {
            debug!(
                phase = %self.ctx.phase(),
                idle_ms = self.policy.idle.as_millis() as u64,
                "nothing applicable"
            );
            self.clock.sleep(self.policy.idle);
            TickAction::Idle
        };

        let report = TickReport {
            tick: self.ctx.tick(),
            phase_before,
            phase_after: self.ctx.phase(),
            action,
            transitions,
        };
        let journaled = match self.journal.as_mut() {
            Some(journal) => journal.append(&TickRecord::from_report(self.script.name(), &report)),
            None => Ok(()),
        };
        if let Some(stop) = fatal {
            if let Err(err) = &journaled {
                warn!(error = %format!("{err:#}"), "journal append failed on fatal tick");
            }
            error!(
                script = %stop.script,
                phase = %stop.phase,
                source = ?stop.source,
                reason = %stop.reason,
                "fatal stop"
            );
            return Err(anyhow::Error::new(stop));
        }
        journaled?;
        Ok(report)
    }

    fn route_events(&mut self, now: Instant, transitions: &mut Vec<Transition<P>>) {
        for event in self.events.drain() {
            let mut requested = Vec::new();
            for rule in route(&self.script.rules, &event) {
                match rule.action() {
                    EventAction::RaiseFlag(flag) => {
                        debug!(flag = %flag, text = %event.text, "flag raised");
                        self.ctx.raise_flag(flag);
                    }
                    EventAction::TransitionTo(phase) => {
                        requested.push((*phase, rule.pattern().to_string()));
                    }
                }
            }
            for (phase, pattern) in requested {
                if phase != self.ctx.phase() {
                    info!(to = %phase, text = %event.text, "event requested transition");
                    self.transition(phase, TransitionCause::Event { pattern }, now, transitions);
                }
            }
        }
    }

    fn apply_phase_timeout(&mut self, now: Instant, transitions: &mut Vec<Transition<P>>) {
        let phase = self.ctx.phase();
        let Some(timeout) = self.script.machine.plan(phase).and_then(|plan| plan.timeout_rule())
        else {
            return;
        };
        if budget::timed_out(self.ctx.phase_entered(), timeout.after, now) {
            warn!(
                phase = %phase,
                to = %timeout.target,
                elapsed_ms = self.ctx.phase_elapsed().as_millis() as u64,
                "phase timed out"
            );
            self.transition(timeout.target, TransitionCause::Timeout, now, transitions);
        }
    }

    fn select_interrupt(&self, env: &E) -> Option<(usize, Activation)> {
        let now = self.ctx.now();
        self.script
            .interrupts
            .iter()
            .enumerate()
            .find_map(|(idx, interrupt)| {
                let trigger = interrupt.trigger();
                let pending = trigger.flag().is_some_and(|flag| self.ctx.flag_pending(flag));
                let last_fired = self.ctx.last_fired(interrupt.name());
                let fired = activation(trigger, pending, last_fired, now)?;
                interrupt
                    .is_applicable(env, &self.ctx)
                    .then_some((idx, fired))
            })
    }

    fn select_task(&self, env: &E) -> Result<Option<usize>> {
        let phase = self.ctx.phase();
        let plan = self
            .script
            .machine
            .plan(phase)
            .ok_or_else(|| anyhow!("phase {phase} has no plan"))?;
        Ok(first_applicable(plan.tasks(), |task| {
            !self.ctx.cooling_down(task.name()) && task.is_applicable(env, &self.ctx)
        }))
    }

    fn run_interrupt(
        &mut self,
        idx: usize,
        fired: Activation,
        env: &mut E,
        fatal: &mut Option<FatalStop>,
    ) -> TickAction {
        let name = self.script.interrupts[idx].name().to_string();
        let flag = self.script.interrupts[idx]
            .trigger()
            .flag()
            .map(str::to_string);
        debug!(
            interrupt = %name,
            activation = ?fired,
            phase = %self.ctx.phase(),
            "running interrupt"
        );

        let started = self.clock.now();
        let suspension = self.ctx.suspend(&name, started);
        let outcome = {
            let mut cx = RunCtx::new(&self.ctx, &self.clock, &mut self.jitter, self.policy.wait);
            self.script.interrupts[idx].run(env, &mut cx)
        };
        let finished = self.clock.now();
        self.ctx.resume(suspension, finished);

        let kind = outcome.kind();
        let detail = outcome.reason().map(str::to_string);
        match &outcome {
            InterruptOutcome::Success => {
                if let Some(flag) = &flag {
                    self.ctx.clear_flag(flag);
                }
                self.ctx.mark_fired(&name, finished);
                self.ctx.interrupt_failures_mut().record_success(&name);
                info!(interrupt = %name, phase = %self.ctx.phase(), "interrupt done");
            }
            InterruptOutcome::Retry(reason) => {
                let streak = self.ctx.interrupt_failures_mut().record_retry(&name);
                debug!(
                    interrupt = %name,
                    retries = streak.retries,
                    reason = %reason,
                    "interrupt retry"
                );
                if is_exhausted(streak, &self.policy.limits) {
                    *fatal = Some(self.fatal(Some(&name), exhausted_reason(streak)));
                }
            }
            InterruptOutcome::Fail(reason) => {
                let streak = self.ctx.interrupt_failures_mut().record_fail(&name);
                warn!(
                    interrupt = %name,
                    phase = %self.ctx.phase(),
                    fails = streak.fails,
                    reason = %reason,
                    "interrupt failed"
                );
                if is_exhausted(streak, &self.policy.limits) {
                    *fatal = Some(self.fatal(Some(&name), exhausted_reason(streak)));
                }
            }
            InterruptOutcome::Fatal(reason) => {
                *fatal = Some(self.fatal(Some(&name), reason.clone()));
            }
        }

        TickAction::Interrupt {
            name,
            activation: fired,
            outcome: kind,
            detail,
        }
    }

    fn run_task(
        &mut self,
        idx: usize,
        env: &mut E,
        transitions: &mut Vec<Transition<P>>,
        fatal: &mut Option<FatalStop>,
    ) -> Result<TickAction> {
        let phase = self.ctx.phase();
        let plan = self
            .script
            .machine
            .plan_mut(phase)
            .ok_or_else(|| anyhow!("phase {phase} has no plan"))?;
        let task = &mut plan.tasks_mut()[idx];
        let name = task.name().to_string();
        let cooldown = task.cooldown();
        debug!(task = %name, phase = %phase, "running task");

        let outcome = {
            let mut cx = RunCtx::new(&self.ctx, &self.clock, &mut self.jitter, self.policy.wait);
            task.run(env, &mut cx)
        };
        let kind = outcome.kind();
        let detail = outcome.reason().map(str::to_string);
        let finished = self.clock.now();

        match outcome {
            Outcome::Success => {
                self.ctx.task_failures_mut().record_success(&name);
                if let Some(cooldown) = cooldown {
                    self.ctx.start_cooldown(&name, finished + cooldown);
                }
            }
            Outcome::TransitionTo(to) => {
                let legal = self
                    .script
                    .machine
                    .plan(phase)
                    .is_some_and(|plan| plan.allows(to));
                if legal {
                    self.ctx.task_failures_mut().record_success(&name);
                    let cause = TransitionCause::Task { task: name.clone() };
                    self.transition(to, cause, finished, transitions);
                } else {
                    *fatal = Some(self.fatal(
                        Some(&name),
                        format!("illegal transition {phase} -> {to}"),
                    ));
                }
            }
            Outcome::Retry(reason) => {
                let streak = self.ctx.task_failures_mut().record_retry(&name);
                debug!(
                    task = %name,
                    phase = %phase,
                    retries = streak.retries,
                    reason = %reason,
                    "task retry"
                );
                self.escalate_if_exhausted(&name, streak, finished, transitions, fatal);
            }
            Outcome::Fail(reason) => {
                let streak = self.ctx.task_failures_mut().record_fail(&name);
                warn!(
                    task = %name,
                    phase = %phase,
                    fails = streak.fails,
                    max = self.policy.limits.max_consecutive_failures,
                    reason = %reason,
                    "task failed"
                );
                self.escalate_if_exhausted(&name, streak, finished, transitions, fatal);
            }
            Outcome::Fatal(reason) => {
                *fatal = Some(self.fatal(Some(&name), reason));
            }
        }

        Ok(TickAction::Task {
            name,
            outcome: kind,
            detail,
        })
    }

    fn escalate_if_exhausted(
        &mut self,
        task: &str,
        streak: Streak,
        now: Instant,
        transitions: &mut Vec<Transition<P>>,
        fatal: &mut Option<FatalStop>,
    ) {
        if !is_exhausted(streak, &self.policy.limits) {
            return;
        }
        let phase = self.ctx.phase();
        match (self.policy.escalation, self.script.machine.recovery()) {
            (EscalationPolicy::Recover, Some(recovery)) if recovery != phase => {
                warn!(
                    task = %task,
                    phase = %phase,
                    to = %recovery,
                    fails = streak.fails,
                    retries = streak.retries,
                    "streak exhausted, forcing recovery"
                );
                self.transition(
                    recovery,
                    TransitionCause::Escalation {
                        task: task.to_string(),
                    },
                    now,
                    transitions,
                );
            }
            _ => *fatal = Some(self.fatal(Some(task), exhausted_reason(streak))),
        }
    }

    fn transition(
        &mut self,
        to: P,
        cause: TransitionCause,
        now: Instant,
        transitions: &mut Vec<Transition<P>>,
    ) {
        let from = self.ctx.enter_phase(to, now);
        info!(from = %from, to = %to, cause = %cause, "phase transition");
        transitions.push(Transition { from, to, cause });
    }

    fn fatal(&self, source: Option<&str>, reason: String) -> FatalStop {
        FatalStop {
            script: self.script.name().to_string(),
            phase: self.ctx.phase().to_string(),
            source: source.map(str::to_string),
            reason,
        }
    }
}

fn exhausted_reason(streak: Streak) -> String {
    format!(
        "gave up after {} consecutive failures and {} retries",
        streak.fails, streak.retries
    )
}
