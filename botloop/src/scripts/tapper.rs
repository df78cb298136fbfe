//! Tap a resource target, wait for the product, drop it and wait for respawn.
//!
//! ```text
//! ready --tap--> waiting --product/timeout--> cleanup --empty--> cooldown --respawn/timeout--> ready
//! ```
//!
//! A full inventory at any point in `ready` diverts to `cleanup`. The `heal`
//! interrupt eats when the `low_health` flag is raised by a chat event.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::context::ScriptContext;
use crate::core::trigger::Trigger;
use crate::core::types::{InterruptOutcome, Outcome, Phase, Priority};
use crate::io::config::TapperConfig;
use crate::io::environment::{EntityQuery, Environment};
use crate::io::events::compile_rules;
use crate::machine::PhasePlan;
use crate::script::Script;
use crate::task::{Interrupt, RunCtx, Task};

/// Flag raised by the low-health event rules.
pub const LOW_HEALTH: &str = "low_health";

const DROP: &str = "Drop";
const EAT: &str = "Eat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TapPhase {
    Ready,
    Waiting,
    Cleanup,
    Cooldown,
}

impl fmt::Display for TapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TapPhase::Ready => "ready",
            TapPhase::Waiting => "waiting",
            TapPhase::Cleanup => "cleanup",
            TapPhase::Cooldown => "cooldown",
        };
        f.write_str(name)
    }
}

impl Phase for TapPhase {
    const ALL: &'static [Self] = &[
        TapPhase::Ready,
        TapPhase::Waiting,
        TapPhase::Cleanup,
        TapPhase::Cooldown,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    StartCleanup,
    Tap,
    Collect,
    DropProduct,
    FinishCleanup,
    AwaitRespawn,
}

impl Step {
    fn name(self) -> &'static str {
        match self {
            Step::StartCleanup => "start-cleanup",
            Step::Tap => "tap",
            Step::Collect => "collect",
            Step::DropProduct => "drop-product",
            Step::FinishCleanup => "finish-cleanup",
            Step::AwaitRespawn => "await-respawn",
        }
    }

    fn priority(self) -> Priority {
        match self {
            Step::StartCleanup | Step::Collect | Step::DropProduct | Step::AwaitRespawn => {
                Priority(0)
            }
            Step::Tap | Step::FinishCleanup => Priority(1),
        }
    }
}

struct TapperTask {
    step: Step,
    cfg: Rc<TapperConfig>,
}

impl TapperTask {
    fn target(&self) -> EntityQuery {
        EntityQuery::named(&self.cfg.target).with_action(&self.cfg.tap_action)
    }

    fn tap<E: Environment + ?Sized>(
        &self,
        env: &mut E,
        cx: &mut RunCtx<'_, TapPhase>,
    ) -> Outcome<TapPhase> {
        // The guard ran against an earlier read; the target may be gone by now.
        let Some(target) = env.nearest_entity(&self.target()) else {
            return Outcome::Retry(format!("{} vanished before tapping", self.cfg.target));
        };
        cx.pause();
        if !env.interact_entity(&target, &self.cfg.tap_action) {
            return Outcome::Fail(format!(
                "{} on {} was rejected",
                self.cfg.tap_action, target.name
            ));
        }
        let product = &self.cfg.product;
        if cx.wait_until(|| env.character().animating || env.inventory_contains(product)) {
            Outcome::TransitionTo(TapPhase::Waiting)
        } else {
            Outcome::Fail(format!("no reaction after tapping {}", target.name))
        }
    }

    fn drop_product<E: Environment + ?Sized>(
        &self,
        env: &mut E,
        cx: &mut RunCtx<'_, TapPhase>,
    ) -> Outcome<TapPhase> {
        let product = &self.cfg.product;
        let before = env.inventory_count(product);
        if before == 0 {
            return Outcome::Retry(format!("{product} already gone"));
        }
        cx.pause();
        if !env.interact_item(product, DROP) {
            return Outcome::Fail(format!("could not drop {product}"));
        }
        if cx.wait_until(|| env.inventory_count(product) < before) {
            Outcome::Success
        } else {
            Outcome::Retry(format!("drop of {product} not confirmed"))
        }
    }
}

impl<E: Environment + ?Sized> Task<E, TapPhase> for TapperTask {
    fn name(&self) -> &str {
        self.step.name()
    }

    fn priority(&self) -> Priority {
        self.step.priority()
    }

    fn is_applicable(&self, env: &E, _ctx: &ScriptContext<TapPhase>) -> bool {
        match self.step {
            Step::StartCleanup => env.inventory_full(),
            Step::Tap | Step::AwaitRespawn => env.nearest_entity(&self.target()).is_some(),
            Step::Collect | Step::DropProduct => env.inventory_contains(&self.cfg.product),
            Step::FinishCleanup => !env.inventory_contains(&self.cfg.product),
        }
    }

    fn run(&mut self, env: &mut E, cx: &mut RunCtx<'_, TapPhase>) -> Outcome<TapPhase> {
        match self.step {
            Step::StartCleanup if !env.inventory_contains(&self.cfg.product) => Outcome::Fatal(
                format!("inventory full without any {}", self.cfg.product),
            ),
            Step::StartCleanup | Step::Collect => Outcome::TransitionTo(TapPhase::Cleanup),
            Step::Tap => self.tap(env, cx),
            Step::DropProduct => self.drop_product(env, cx),
            Step::FinishCleanup => Outcome::TransitionTo(TapPhase::Cooldown),
            Step::AwaitRespawn => Outcome::TransitionTo(TapPhase::Ready),
        }
    }
}

struct Heal {
    trigger: Trigger,
    food: String,
}

impl<E: Environment + ?Sized> Interrupt<E, TapPhase> for Heal {
    fn name(&self) -> &str {
        "heal"
    }

    fn priority(&self) -> Priority {
        Priority(0)
    }

    fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    fn run(&mut self, env: &mut E, cx: &mut RunCtx<'_, TapPhase>) -> InterruptOutcome {
        let before = env.character();
        if before.health >= before.max_health {
            return InterruptOutcome::Success;
        }
        if !env.inventory_contains(&self.food) {
            return InterruptOutcome::Fatal(format!("out of {}", self.food));
        }
        if !env.interact_item(&self.food, EAT) {
            return InterruptOutcome::Fail(format!("could not eat {}", self.food));
        }
        if cx.wait_until(|| env.character().health > before.health) {
            InterruptOutcome::Success
        } else {
            InterruptOutcome::Retry("health did not rise after eating".to_string())
        }
    }
}

/// Build the tapper script from its config section.
pub fn script<E: Environment + ?Sized + 'static>(
    cfg: &TapperConfig,
) -> Result<Script<E, TapPhase>> {
    cfg.validate()?;
    let rules = compile_rules::<TapPhase>(&cfg.events).context("compile tapper event rules")?;
    let shared = Rc::new(cfg.clone());
    let task = |step: Step| TapperTask {
        step,
        cfg: Rc::clone(&shared),
    };

    Script::<E, TapPhase>::builder("tapper")
        .phase(
            TapPhase::Ready,
            PhasePlan::new()
                .task(task(Step::StartCleanup))
                .task(task(Step::Tap))
                .exit(TapPhase::Cleanup)
                .exit(TapPhase::Waiting),
        )
        .phase(
            TapPhase::Waiting,
            PhasePlan::new()
                .task(task(Step::Collect))
                .exit(TapPhase::Cleanup)
                .timeout(Duration::from_millis(cfg.waiting_timeout_ms), TapPhase::Cleanup),
        )
        .phase(
            TapPhase::Cleanup,
            PhasePlan::new()
                .task(task(Step::DropProduct))
                .task(task(Step::FinishCleanup))
                .exit(TapPhase::Cooldown),
        )
        .phase(
            TapPhase::Cooldown,
            PhasePlan::new()
                .task(task(Step::AwaitRespawn))
                .exit(TapPhase::Ready)
                .timeout(Duration::from_millis(cfg.cooldown_timeout_ms), TapPhase::Ready),
        )
        .interrupt(Heal {
            trigger: Trigger::on_flag(LOW_HEALTH),
            food: cfg.food.clone(),
        })
        .rules(rules)
        .recovery(TapPhase::Cleanup)
        .initial(|env: &E| {
            if env.inventory_full() {
                TapPhase::Cleanup
            } else {
                TapPhase::Ready
            }
        })
        .safe_to_stop(|env: &E, ctx: &ScriptContext<TapPhase>| {
            ctx.phase() != TapPhase::Waiting && !env.character().animating
        })
        .build()
}
