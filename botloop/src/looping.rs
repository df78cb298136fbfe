//! Multi-tick driver: tick until a stop is requested, a tick limit is hit, or
//! the script stops fatally.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing::{info, warn};

use crate::core::types::Phase;
use crate::io::clock::Clock;
use crate::io::config::EngineConfig;
use crate::scheduler::{FatalStop, Scheduler, TickReport};

/// Cooperative cancellation flag shared with the host.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    /// Stop after this many ticks (`None` runs until stopped).
    pub max_ticks: Option<u64>,
    /// Extra ticks granted after a stop request while the script is not safe to stop.
    pub stop_grace_ticks: u64,
}

impl LoopLimits {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            max_ticks: None,
            stop_grace_ticks: cfg.stop_grace_ticks,
        }
    }
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The host requested a stop. `clean` is false if the grace ticks ran out
    /// before the script reported a safe point.
    Requested { clean: bool },
    /// The configured tick limit was reached.
    MaxTicks { ticks: u64 },
    Fatal(FatalStop),
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub ticks: u64,
    pub final_phase: String,
    pub stop: LoopStop,
}

/// Tick `scheduler` repeatedly, calling `on_tick` after every completed tick.
///
/// A [`FatalStop`] ends the loop with `LoopStop::Fatal`; any other error
/// (journal I/O, missing plan) is returned as-is.
pub fn run_loop<E, P, C, F>(
    scheduler: &mut Scheduler<E, P, C>,
    env: &mut E,
    stop: &StopHandle,
    limits: &LoopLimits,
    mut on_tick: F,
) -> Result<LoopOutcome>
where
    E: ?Sized,
    P: Phase,
    C: Clock,
    F: FnMut(&TickReport<P>),
{
    let mut ticks = 0u64;
    let mut grace_used: Option<u64> = None;
    loop {
        if stop.is_requested() {
            if scheduler.safe_to_stop(env) {
                info!(ticks, phase = %scheduler.context().phase(), "stopped at safe point");
                return Ok(finish(scheduler, ticks, LoopStop::Requested { clean: true }));
            }
            let used = grace_used.get_or_insert(0);
            if *used >= limits.stop_grace_ticks {
                warn!(
                    ticks,
                    phase = %scheduler.context().phase(),
                    grace = limits.stop_grace_ticks,
                    "not safe to stop after grace ticks, stopping anyway"
                );
                return Ok(finish(scheduler, ticks, LoopStop::Requested { clean: false }));
            }
            *used += 1;
        }
        if let Some(max) = limits.max_ticks {
            if ticks >= max {
                return Ok(finish(scheduler, ticks, LoopStop::MaxTicks { ticks }));
            }
        }

        match scheduler.tick(env) {
            Ok(report) => {
                ticks += 1;
                on_tick(&report);
            }
            Err(err) => {
                if let Some(fatal) = err.downcast_ref::<FatalStop>() {
                    ticks += 1;
                    return Ok(finish(scheduler, ticks, LoopStop::Fatal(fatal.clone())));
                }
                return Err(err);
            }
        }
    }
}

fn finish<E: ?Sized, P: Phase, C: Clock>(
    scheduler: &Scheduler<E, P, C>,
    ticks: u64,
    stop: LoopStop,
) -> LoopOutcome {
    LoopOutcome {
        ticks,
        final_phase: scheduler.context().phase().to_string(),
        stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Outcome;
    use crate::exit_codes;
    use crate::io::jitter::Jitter;
    use crate::machine::PhasePlan;
    use crate::scheduler::SchedulerPolicy;
    use crate::script::ScriptBuilder;
    use crate::test_support::{FakeEnv, ManualClock, ScriptedTask, TestPhase, filler_builder};

    fn start(
        builder: ScriptBuilder<FakeEnv, TestPhase>,
        env: &mut FakeEnv,
    ) -> Scheduler<FakeEnv, TestPhase, ManualClock> {
        let script = builder.build().expect("script");
        Scheduler::start(
            script,
            env,
            ManualClock::new(),
            Jitter::none(),
            SchedulerPolicy::default(),
        )
    }

    fn busy(task: ScriptedTask) -> ScriptBuilder<FakeEnv, TestPhase> {
        filler_builder().phase(
            TestPhase::Ready,
            PhasePlan::new().task(task).exit(TestPhase::Waiting),
        )
    }

    #[test]
    fn limits_from_config_run_unbounded() {
        let cfg = EngineConfig {
            stop_grace_ticks: 7,
            ..EngineConfig::default()
        };
        assert_eq!(
            LoopLimits::from_config(&cfg),
            LoopLimits {
                max_ticks: None,
                stop_grace_ticks: 7
            }
        );
    }

    #[test]
    fn stops_at_tick_limit_and_reports_every_tick() {
        let mut env = FakeEnv::new();
        let mut scheduler = start(busy(ScriptedTask::new("work", 0)), &mut env);
        let mut seen = Vec::new();
        let outcome = run_loop(
            &mut scheduler,
            &mut env,
            &StopHandle::new(),
            &LoopLimits {
                max_ticks: Some(3),
                stop_grace_ticks: 0,
            },
            |report| seen.push(report.tick),
        )
        .expect("loop");

        assert_eq!(outcome.ticks, 3);
        assert_eq!(outcome.stop, LoopStop::MaxTicks { ticks: 3 });
        assert_eq!(outcome.final_phase, "ready");
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(exit_codes::for_stop(&outcome.stop), exit_codes::INCOMPLETE);
    }

    #[test]
    fn requested_stop_halts_immediately_when_safe() {
        let mut env = FakeEnv::new();
        let task = ScriptedTask::new("work", 0);
        let runs = task.runs();
        let mut scheduler = start(busy(task), &mut env);
        let stop = StopHandle::new();
        stop.request();

        let outcome = run_loop(
            &mut scheduler,
            &mut env,
            &stop,
            &LoopLimits {
                max_ticks: None,
                stop_grace_ticks: 5,
            },
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.ticks, 0);
        assert_eq!(outcome.stop, LoopStop::Requested { clean: true });
        assert_eq!(runs.get(), 0);
        assert_eq!(exit_codes::for_stop(&outcome.stop), exit_codes::OK);
    }

    #[test]
    fn unsafe_stop_runs_grace_ticks_then_gives_up() {
        let mut env = FakeEnv::new();
        let builder = busy(ScriptedTask::new("work", 0))
            .safe_to_stop(|_: &FakeEnv, _: &crate::context::ScriptContext<TestPhase>| false);
        let mut scheduler = start(builder, &mut env);
        let stop = StopHandle::new();
        stop.request();

        let outcome = run_loop(
            &mut scheduler,
            &mut env,
            &stop,
            &LoopLimits {
                max_ticks: None,
                stop_grace_ticks: 2,
            },
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.ticks, 2);
        assert_eq!(outcome.stop, LoopStop::Requested { clean: false });
    }

    #[test]
    fn grace_ticks_end_early_at_a_safe_point() {
        let mut env = FakeEnv::new();
        let builder = busy(ScriptedTask::new("work", 0)).safe_to_stop(
            |_: &FakeEnv, ctx: &crate::context::ScriptContext<TestPhase>| ctx.tick() >= 1,
        );
        let mut scheduler = start(builder, &mut env);
        let stop = StopHandle::new();
        stop.request();

        let outcome = run_loop(
            &mut scheduler,
            &mut env,
            &stop,
            &LoopLimits {
                max_ticks: None,
                stop_grace_ticks: 5,
            },
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.ticks, 1);
        assert_eq!(outcome.stop, LoopStop::Requested { clean: true });
    }

    #[test]
    fn fatal_outcome_ends_the_loop() {
        let mut env = FakeEnv::new();
        let task = ScriptedTask::new("work", 0)
            .then(Outcome::Success)
            .then(Outcome::Fatal("tool missing".to_string()));
        let mut scheduler = start(busy(task), &mut env);

        let outcome = run_loop(
            &mut scheduler,
            &mut env,
            &StopHandle::new(),
            &LoopLimits {
                max_ticks: Some(10),
                stop_grace_ticks: 0,
            },
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.ticks, 2);
        let LoopStop::Fatal(fatal) = &outcome.stop else {
            panic!("expected fatal stop, got {:?}", outcome.stop);
        };
        assert_eq!(fatal.source.as_deref(), Some("work"));
        assert_eq!(fatal.reason, "tool missing");
        assert_eq!(fatal.phase, "ready");
        assert_eq!(exit_codes::for_stop(&outcome.stop), exit_codes::FATAL);
    }
}
