//! Salvage a shipwreck until the inventory is full, then sort the haul.
//!
//! The `harvest` interrupt empties the harvester either when the
//! `harvest_ready` flag is raised by a chat message or on a fixed timer,
//! whichever comes first.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::context::ScriptContext;
use crate::core::trigger::Trigger;
use crate::core::types::{InterruptOutcome, Outcome, Phase, Priority};
use crate::io::config::SalvagerConfig;
use crate::io::environment::{Entity, EntityQuery, Environment};
use crate::io::events::compile_rules;
use crate::machine::PhasePlan;
use crate::script::Script;
use crate::task::{Interrupt, RunCtx, Task};

pub const HARVEST_READY: &str = "harvest_ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SalvagePhase {
    Salvaging,
    Sorting,
}

impl fmt::Display for SalvagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SalvagePhase::Salvaging => f.write_str("salvaging"),
            SalvagePhase::Sorting => f.write_str("sorting"),
        }
    }
}

impl Phase for SalvagePhase {
    const ALL: &'static [Self] = &[SalvagePhase::Salvaging, SalvagePhase::Sorting];
}

/// Bring `entity` on screen if needed. Returns false if it stays hidden.
fn bring_into_view<E: Environment + ?Sized, P: Phase>(
    env: &mut E,
    cx: &RunCtx<'_, P>,
    entity: &Entity,
) -> bool {
    if env.in_viewport(entity) {
        return true;
    }
    env.turn_camera_to(entity) && cx.wait_until(|| env.in_viewport(entity))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    BeginSort,
    Salvage,
    SortSalvage,
    ResumeSalvage,
}

struct SalvagerTask {
    step: Step,
    cfg: Rc<SalvagerConfig>,
}

impl SalvagerTask {
    fn wreck(&self) -> EntityQuery {
        EntityQuery::named(&self.cfg.wreck).with_action(&self.cfg.salvage_action)
    }

    fn salvage<E: Environment + ?Sized>(
        &self,
        env: &mut E,
        cx: &mut RunCtx<'_, SalvagePhase>,
    ) -> Outcome<SalvagePhase> {
        let Some(wreck) = env.nearest_entity(&self.wreck()) else {
            return Outcome::Retry(format!("{} out of reach", self.cfg.wreck));
        };
        if !bring_into_view(env, cx, &wreck) {
            return Outcome::Retry(format!("{} is off-screen", wreck.name));
        }
        let item = &self.cfg.salvage_item;
        let before = env.inventory_count(item);
        cx.pause();
        if !env.interact_entity(&wreck, &self.cfg.salvage_action) {
            return Outcome::Fail(format!(
                "{} on {} was rejected",
                self.cfg.salvage_action, wreck.name
            ));
        }
        if cx.wait_until(|| env.character().animating || env.inventory_count(item) > before) {
            Outcome::Success
        } else {
            Outcome::Fail(format!("no {item} after salvaging"))
        }
    }

    fn sort<E: Environment + ?Sized>(
        &self,
        env: &mut E,
        cx: &mut RunCtx<'_, SalvagePhase>,
    ) -> Outcome<SalvagePhase> {
        let item = &self.cfg.salvage_item;
        let before = env.inventory_count(item);
        cx.pause();
        if !env.interact_item(item, &self.cfg.sort_action) {
            return Outcome::Fail(format!("could not {} {item}", self.cfg.sort_action));
        }
        if cx.wait_until(|| env.inventory_count(item) < before) {
            Outcome::Success
        } else {
            Outcome::Retry(format!("{item} count unchanged after sorting"))
        }
    }
}

impl<E: Environment + ?Sized> Task<E, SalvagePhase> for SalvagerTask {
    fn name(&self) -> &str {
        match self.step {
            Step::BeginSort => "begin-sort",
            Step::Salvage => "salvage",
            Step::SortSalvage => "sort-salvage",
            Step::ResumeSalvage => "resume-salvage",
        }
    }

    fn priority(&self) -> Priority {
        match self.step {
            Step::BeginSort | Step::SortSalvage => Priority(0),
            Step::Salvage | Step::ResumeSalvage => Priority(1),
        }
    }

    fn is_applicable(&self, env: &E, _ctx: &ScriptContext<SalvagePhase>) -> bool {
        match self.step {
            Step::BeginSort => env.inventory_full(),
            Step::Salvage => {
                env.character().is_idle() && env.nearest_entity(&self.wreck()).is_some()
            }
            Step::SortSalvage => env.inventory_contains(&self.cfg.salvage_item),
            Step::ResumeSalvage => !env.inventory_contains(&self.cfg.salvage_item),
        }
    }

    fn run(&mut self, env: &mut E, cx: &mut RunCtx<'_, SalvagePhase>) -> Outcome<SalvagePhase> {
        match self.step {
            Step::BeginSort if !env.inventory_contains(&self.cfg.salvage_item) => Outcome::Fatal(
                format!("inventory full without any {}", self.cfg.salvage_item),
            ),
            Step::BeginSort => Outcome::TransitionTo(SalvagePhase::Sorting),
            Step::Salvage => self.salvage(env, cx),
            Step::SortSalvage => self.sort(env, cx),
            Step::ResumeSalvage => Outcome::TransitionTo(SalvagePhase::Salvaging),
        }
    }
}

struct Harvest {
    trigger: Trigger,
    cfg: Rc<SalvagerConfig>,
}

impl Harvest {
    fn harvester(&self) -> EntityQuery {
        EntityQuery::named(&self.cfg.harvester).with_action(&self.cfg.harvest_action)
    }
}

impl<E: Environment + ?Sized> Interrupt<E, SalvagePhase> for Harvest {
    fn name(&self) -> &str {
        "harvest"
    }

    fn priority(&self) -> Priority {
        Priority(0)
    }

    fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// The trigger stays pending while the harvester is out of sight.
    fn is_applicable(&self, env: &E, _ctx: &ScriptContext<SalvagePhase>) -> bool {
        env.nearest_entity(&self.harvester()).is_some()
    }

    fn run(&mut self, env: &mut E, cx: &mut RunCtx<'_, SalvagePhase>) -> InterruptOutcome {
        let Some(harvester) = env.nearest_entity(&self.harvester()) else {
            return InterruptOutcome::Retry(format!("{} out of reach", self.cfg.harvester));
        };
        if !bring_into_view(env, cx, &harvester) {
            return InterruptOutcome::Retry(format!("{} is off-screen", harvester.name));
        }
        let item = &self.cfg.harvest_item;
        let before = env.inventory_count(item);
        cx.pause();
        if !env.interact_entity(&harvester, &self.cfg.harvest_action) {
            return InterruptOutcome::Fail(format!(
                "{} on {} was rejected",
                self.cfg.harvest_action, harvester.name
            ));
        }
        if cx.wait_until(|| env.inventory_count(item) > before) {
            InterruptOutcome::Success
        } else {
            InterruptOutcome::Retry(format!("no {item} collected"))
        }
    }
}

/// Build the salvager script from its config section.
pub fn script<E: Environment + ?Sized + 'static>(
    cfg: &SalvagerConfig,
) -> Result<Script<E, SalvagePhase>> {
    cfg.validate()?;
    let rules =
        compile_rules::<SalvagePhase>(&cfg.events).context("compile salvager event rules")?;
    let shared = Rc::new(cfg.clone());
    let task = |step: Step| SalvagerTask {
        step,
        cfg: Rc::clone(&shared),
    };

    Script::<E, SalvagePhase>::builder("salvager")
        .phase(
            SalvagePhase::Salvaging,
            PhasePlan::new()
                .task(task(Step::BeginSort))
                .task(task(Step::Salvage))
                .exit(SalvagePhase::Sorting),
        )
        .phase(
            SalvagePhase::Sorting,
            PhasePlan::new()
                .task(task(Step::SortSalvage))
                .task(task(Step::ResumeSalvage))
                .exit(SalvagePhase::Salvaging)
                .timeout(
                    Duration::from_millis(cfg.sorting_timeout_ms),
                    SalvagePhase::Salvaging,
                ),
        )
        .interrupt(Harvest {
            trigger: Trigger::on_flag(HARVEST_READY)
                .or_every(Duration::from_millis(cfg.harvest_every_ms)),
            cfg: Rc::clone(&shared),
        })
        .rules(rules)
        .recovery(SalvagePhase::Salvaging)
        .initial(|env: &E| {
            if env.inventory_full() {
                SalvagePhase::Sorting
            } else {
                SalvagePhase::Salvaging
            }
        })
        .safe_to_stop(|env: &E, _: &ScriptContext<SalvagePhase>| env.character().is_idle())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trigger::Activation;
    use crate::core::types::OutcomeKind;
    use crate::io::jitter::Jitter;
    use crate::looping::{LoopLimits, LoopStop, StopHandle, run_loop};
    use crate::scheduler::{Scheduler, SchedulerPolicy, TickAction};
    use crate::test_support::{Effect, FakeEnv, ManualClock};

    fn start(env: &mut FakeEnv) -> (Scheduler<FakeEnv, SalvagePhase, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let script = script::<FakeEnv>(&SalvagerConfig::default()).expect("salvager");
        let scheduler = Scheduler::start(
            script,
            env,
            clock.clone(),
            Jitter::none(),
            SchedulerPolicy::default(),
        );
        (scheduler, clock)
    }

    fn wreck_env() -> FakeEnv {
        let mut env = FakeEnv::new();
        env.spawn("Shipwreck", 3, &["Salvage"]);
        env.spawn("Harvester", 1, &["Harvest"]);
        env.react(
            "Shipwreck",
            "Salvage",
            vec![Effect::AddItem("Salvage".to_string(), 1)],
        );
        env.react(
            "Salvage",
            "Sort",
            vec![Effect::RemoveItem("Salvage".to_string(), 1)],
        );
        env.react(
            "Harvester",
            "Harvest",
            vec![Effect::AddItem("Seaweed".to_string(), 1)],
        );
        env
    }

    #[test]
    fn salvages_until_full_then_sorts() {
        let mut env = wreck_env();
        env.set_item("Seaweed", 26);
        let (mut scheduler, _) = start(&mut env);
        assert_eq!(scheduler.context().phase(), SalvagePhase::Salvaging);

        let names: Vec<String> = (0..6)
            .map(|_| {
                let report = scheduler.tick(&mut env).expect("tick");
                report.action.name().unwrap_or("idle").to_string()
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "salvage",
                "salvage",
                "begin-sort",
                "sort-salvage",
                "sort-salvage",
                "resume-salvage"
            ]
        );
        assert_eq!(scheduler.context().phase(), SalvagePhase::Salvaging);
    }

    #[test]
    fn salvage_turns_camera_to_offscreen_wreck() {
        let mut env = wreck_env();
        env.set_offscreen("Shipwreck");
        let (mut scheduler, _) = start(&mut env);

        let report = scheduler.tick(&mut env).expect("tick");
        assert_eq!(report.action.outcome(), Some(OutcomeKind::Success));
        assert_eq!(env.interactions(), &["camera:Shipwreck", "Shipwreck:Salvage"]);
    }

    #[test]
    fn harvest_fires_on_timer_and_rearms() {
        let mut env = wreck_env();
        let (mut scheduler, clock) = start(&mut env);

        clock.advance(Duration::from_millis(300_000));
        let report = scheduler.tick(&mut env).expect("harvest");
        assert!(matches!(
            report.action,
            TickAction::Interrupt {
                activation: Activation::Timer,
                outcome: OutcomeKind::Success,
                ..
            }
        ));
        assert_eq!(env.inventory_count("Seaweed"), 1);

        let report = scheduler.tick(&mut env).expect("back to work");
        assert_eq!(report.action.name(), Some("salvage"));
    }

    #[test]
    fn harvest_waits_while_harvester_is_out_of_sight() {
        let mut env = wreck_env();
        env.despawn("Harvester");
        let (mut scheduler, _) = start(&mut env);

        env.emit_chat("Your harvester is full.");
        let report = scheduler.tick(&mut env).expect("tick");
        assert_eq!(report.action.name(), Some("salvage"));
        assert!(scheduler.context().flag_pending(HARVEST_READY));

        env.spawn("Harvester", 1, &["Harvest"]);
        let report = scheduler.tick(&mut env).expect("tick");
        assert_eq!(report.action.name(), Some("harvest"));
        assert!(!scheduler.context().flag_pending(HARVEST_READY));
    }

    #[test]
    fn full_inventory_without_salvage_stops_instead_of_cycling() {
        let mut env = wreck_env();
        env.fill_inventory("Seaweed");
        let (mut scheduler, _) = start(&mut env);
        assert_eq!(scheduler.context().phase(), SalvagePhase::Sorting);

        let outcome = run_loop(
            &mut scheduler,
            &mut env,
            &StopHandle::new(),
            &LoopLimits {
                max_ticks: Some(1000),
                stop_grace_ticks: 0,
            },
            |_| {},
        )
        .expect("loop");

        let LoopStop::Fatal(fatal) = &outcome.stop else {
            panic!("expected fatal stop, got {:?}", outcome.stop);
        };
        assert_eq!(fatal.source.as_deref(), Some("begin-sort"));
        assert_eq!(fatal.reason, "inventory full without any Salvage");
        assert_eq!(outcome.ticks, 2);
        assert!(env.interactions().is_empty());
    }
}
