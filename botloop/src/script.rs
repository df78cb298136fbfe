//! A complete, validated bot script: phase machine, interrupts, event rules,
//! initial-phase selection and the safe-to-stop predicate.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use anyhow::{Result, bail};

use crate::context::ScriptContext;
use crate::core::selector::sort_by_priority;
use crate::core::types::Phase;
use crate::io::events::{EventAction, EventRule};
use crate::machine::{PhaseMachine, PhasePlan};
use crate::task::Interrupt;

type InitialPhase<E, P> = Box<dyn Fn(&E) -> P>;
type StopCheck<E, P> = Box<dyn Fn(&E, &ScriptContext<P>) -> bool>;

pub struct Script<E: ?Sized, P: Phase> {
    name: String,
    pub(crate) machine: PhaseMachine<E, P>,
    pub(crate) interrupts: Vec<Box<dyn Interrupt<E, P>>>,
    pub(crate) rules: Vec<EventRule<P>>,
    initial: InitialPhase<E, P>,
    safe_to_stop: StopCheck<E, P>,
}

impl<E: ?Sized, P: Phase> Script<E, P> {
    pub fn builder(name: impl Into<String>) -> ScriptBuilder<E, P> {
        ScriptBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn machine(&self) -> &PhaseMachine<E, P> {
        &self.machine
    }

    /// Interrupts in evaluation order.
    pub fn interrupts(&self) -> &[Box<dyn Interrupt<E, P>>] {
        &self.interrupts
    }

    pub fn rules(&self) -> &[EventRule<P>] {
        &self.rules
    }

    /// Phase to start in, chosen from the startup environment.
    pub fn initial_phase(&self, env: &E) -> P {
        (self.initial)(env)
    }

    pub fn safe_to_stop(&self, env: &E, ctx: &ScriptContext<P>) -> bool {
        (self.safe_to_stop)(env, ctx)
    }

    /// Human-readable phase/task/interrupt tables.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let recovery = self
            .machine
            .recovery()
            .map(|phase| phase.to_string())
            .unwrap_or_else(|| "none".to_string());
        let _ = writeln!(out, "script {} (recovery: {recovery})", self.name);

        if !self.interrupts.is_empty() {
            let _ = writeln!(out, "interrupts:");
            for interrupt in &self.interrupts {
                let _ = writeln!(
                    out,
                    "  [{}] {}  trigger: {}",
                    interrupt.priority(),
                    interrupt.name(),
                    interrupt.trigger()
                );
            }
        }

        for phase in P::ALL {
            let Some(plan) = self.machine.plan(*phase) else {
                continue;
            };
            let exits: Vec<String> = plan.exits().iter().map(|p| p.to_string()).collect();
            let _ = write!(out, "phase {phase}  exits: [{}]", exits.join(", "));
            if let Some(timeout) = plan.timeout_rule() {
                let _ = write!(
                    out,
                    "  timeout: {}ms -> {}",
                    timeout.after.as_millis(),
                    timeout.target
                );
            }
            out.push('\n');
            for task in plan.tasks() {
                let _ = writeln!(out, "  [{}] {}", task.priority(), task.name());
            }
        }

        if !self.rules.is_empty() {
            let _ = writeln!(out, "events:");
            for rule in &self.rules {
                let _ = writeln!(out, "  {rule}");
            }
        }
        out
    }
}

pub struct ScriptBuilder<E: ?Sized, P: Phase> {
    name: String,
    plans: BTreeMap<P, PhasePlan<E, P>>,
    interrupts: Vec<Box<dyn Interrupt<E, P>>>,
    rules: Vec<EventRule<P>>,
    recovery: Option<P>,
    initial: Option<InitialPhase<E, P>>,
    safe_to_stop: Option<StopCheck<E, P>>,
}

impl<E: ?Sized, P: Phase> ScriptBuilder<E, P> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plans: BTreeMap::new(),
            interrupts: Vec::new(),
            rules: Vec::new(),
            recovery: None,
            initial: None,
            safe_to_stop: None,
        }
    }

    pub fn phase(mut self, phase: P, plan: PhasePlan<E, P>) -> Self {
        self.plans.insert(phase, plan);
        self
    }

    pub fn interrupt(mut self, interrupt: impl Interrupt<E, P> + 'static) -> Self {
        self.interrupts.push(Box::new(interrupt));
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = EventRule<P>>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Phase forced when a task exhausts its streak under the `recover` policy.
    pub fn recovery(mut self, phase: P) -> Self {
        self.recovery = Some(phase);
        self
    }

    pub fn initial(mut self, choose: impl Fn(&E) -> P + 'static) -> Self {
        self.initial = Some(Box::new(choose));
        self
    }

    pub fn initial_phase(self, phase: P) -> Self {
        self.initial(move |_: &E| phase)
    }

    pub fn safe_to_stop(mut self, check: impl Fn(&E, &ScriptContext<P>) -> bool + 'static) -> Self {
        self.safe_to_stop = Some(Box::new(check));
        self
    }

    pub fn build(self) -> Result<Script<E, P>> {
        let Some(initial) = self.initial else {
            bail!("script {} has no initial phase", self.name);
        };
        let machine = PhaseMachine::new(self.plans, self.recovery)?;

        let mut names: BTreeSet<String> = machine.task_names().map(str::to_string).collect();
        let mut listened = BTreeSet::new();
        for interrupt in &self.interrupts {
            if !names.insert(interrupt.name().to_string()) {
                bail!("duplicate interrupt name '{}'", interrupt.name());
            }
            let trigger = interrupt.trigger();
            if trigger.flag().is_none() && trigger.interval().is_none() {
                bail!("interrupt '{}' has an empty trigger", interrupt.name());
            }
            if trigger.interval().is_some_and(|every| every.is_zero()) {
                bail!("interrupt '{}' interval must be > 0", interrupt.name());
            }
            if let Some(flag) = trigger.flag() {
                listened.insert(flag.to_string());
            }
        }
        for rule in &self.rules {
            if let EventAction::RaiseFlag(flag) = rule.action() {
                if !listened.contains(flag) {
                    bail!(
                        "event /{}/ raises flag '{flag}' but no interrupt listens for it",
                        rule.pattern()
                    );
                }
            }
        }

        let mut interrupts = self.interrupts;
        sort_by_priority(&mut interrupts, |interrupt| interrupt.priority());

        let safe_to_stop = match self.safe_to_stop {
            Some(check) => check,
            None => {
                let always: StopCheck<E, P> = Box::new(|_: &E, _: &ScriptContext<P>| true);
                always
            }
        };

        Ok(Script {
            name: self.name,
            machine,
            interrupts,
            rules: self.rules,
            initial,
            safe_to_stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::trigger::Trigger;
    use crate::test_support::{FakeEnv, ScriptedInterrupt, ScriptedTask, TestPhase};

    fn builder() -> ScriptBuilder<FakeEnv, TestPhase> {
        let mut builder = Script::builder("test").initial_phase(TestPhase::Ready);
        for phase in TestPhase::ALL {
            builder = builder.phase(
                *phase,
                PhasePlan::new()
                    .task(ScriptedTask::idle(&format!("{phase}-idle"), 0))
                    .exit(TestPhase::Ready),
            );
        }
        builder
    }

    #[test]
    fn build_requires_initial_phase() {
        let builder: ScriptBuilder<FakeEnv, TestPhase> = ScriptBuilder::new("bare");
        let err = builder.build().err().expect("no initial");
        assert!(err.to_string().contains("no initial phase"));
    }

    #[test]
    fn build_rejects_unheard_flags() {
        let err = builder()
            .rules([EventRule::raise("poisoned", "low_health").expect("rule")])
            .build()
            .err()
            .expect("unheard flag");
        assert!(err.to_string().contains("no interrupt listens"));

        let script = builder()
            .interrupt(ScriptedInterrupt::new("heal", 0, Trigger::on_flag("low_health")))
            .rules([EventRule::raise("poisoned", "low_health").expect("rule")])
            .build()
            .expect("build");
        assert_eq!(script.rules().len(), 1);
    }

    #[test]
    fn build_sorts_interrupts_and_rejects_name_clash() {
        let script = builder()
            .interrupt(ScriptedInterrupt::new("slow", 5, Trigger::every(Duration::from_secs(1))))
            .interrupt(ScriptedInterrupt::new("urgent", 1, Trigger::on_flag("x")))
            .build()
            .expect("build");
        let names: Vec<&str> = script.interrupts().iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["urgent", "slow"]);

        let err = builder()
            .interrupt(ScriptedInterrupt::new("ready-idle", 0, Trigger::on_flag("x")))
            .build()
            .err()
            .expect("clash");
        assert!(err.to_string().contains("duplicate interrupt name"));
    }

    #[test]
    fn build_rejects_zero_interval() {
        let err = builder()
            .interrupt(ScriptedInterrupt::new("spin", 0, Trigger::every(Duration::ZERO)))
            .build()
            .err()
            .expect("zero interval");
        assert!(err.to_string().contains("interval must be > 0"));
    }

    #[test]
    fn describe_lists_phases_in_declaration_order() {
        let script = builder()
            .recovery(TestPhase::Cleanup)
            .interrupt(ScriptedInterrupt::new("heal", 0, Trigger::on_flag("low_health")))
            .build()
            .expect("build");
        let text = script.describe();
        assert!(text.starts_with("script test (recovery: cleanup)"));
        let ready = text.find("phase ready").expect("ready");
        let cooldown = text.find("phase cooldown").expect("cooldown");
        assert!(ready < cooldown);
        assert!(text.contains("[0] heal  trigger: flag=low_health"));
    }
}
