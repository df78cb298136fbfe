//! Phase state machine: per-phase task lists, legal exits and timeouts.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{Result, bail};

use crate::core::selector::sort_by_priority;
use crate::core::types::Phase;
use crate::task::Task;

/// Forced transition once a phase has run for `after` without leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeout<P> {
    pub after: Duration,
    pub target: P,
}

/// Tasks, exits and timeout bound to one phase.
pub struct PhasePlan<E: ?Sized, P: Phase> {
    tasks: Vec<Box<dyn Task<E, P>>>,
    exits: BTreeSet<P>,
    timeout: Option<PhaseTimeout<P>>,
}

impl<E: ?Sized, P: Phase> Default for PhasePlan<E, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ?Sized, P: Phase> PhasePlan<E, P> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            exits: BTreeSet::new(),
            timeout: None,
        }
    }

    pub fn task(mut self, task: impl Task<E, P> + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn boxed_task(mut self, task: Box<dyn Task<E, P>>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Declare `phase` as a legal `TransitionTo` target from this phase.
    pub fn exit(mut self, phase: P) -> Self {
        self.exits.insert(phase);
        self
    }

    pub fn timeout(mut self, after: Duration, target: P) -> Self {
        self.timeout = Some(PhaseTimeout { after, target });
        self
    }

    /// Tasks in evaluation order.
    pub fn tasks(&self) -> &[Box<dyn Task<E, P>>] {
        &self.tasks
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut [Box<dyn Task<E, P>>] {
        &mut self.tasks
    }

    pub fn exits(&self) -> &BTreeSet<P> {
        &self.exits
    }

    pub fn timeout_rule(&self) -> Option<PhaseTimeout<P>> {
        self.timeout
    }

    pub fn allows(&self, to: P) -> bool {
        self.exits.contains(&to)
    }
}

/// Every phase of a script with its plan, plus the recovery phase.
pub struct PhaseMachine<E: ?Sized, P: Phase> {
    plans: BTreeMap<P, PhasePlan<E, P>>,
    recovery: Option<P>,
}

impl<E: ?Sized, P: Phase> PhaseMachine<E, P> {
    /// Validate and freeze the plans. Tasks are sorted by priority (stable).
    pub fn new(mut plans: BTreeMap<P, PhasePlan<E, P>>, recovery: Option<P>) -> Result<Self> {
        let mut names = BTreeSet::new();
        for phase in P::ALL {
            let Some(plan) = plans.get_mut(phase) else {
                bail!("phase {phase} has no plan");
            };
            if plan.tasks.is_empty() {
                bail!("phase {phase} has no tasks and would stall");
            }
            if plan.exits.is_empty() && plan.timeout.is_none() {
                bail!("phase {phase} has neither exits nor a timeout");
            }
            if let Some(timeout) = plan.timeout {
                if timeout.after.is_zero() {
                    bail!("phase {phase} timeout must be > 0");
                }
            }
            for task in &plan.tasks {
                if !names.insert(task.name().to_string()) {
                    bail!("duplicate task name '{}' in phase {phase}", task.name());
                }
            }
            sort_by_priority(&mut plan.tasks, |task| task.priority());
        }
        Ok(Self { plans, recovery })
    }

    pub fn plan(&self, phase: P) -> Option<&PhasePlan<E, P>> {
        self.plans.get(&phase)
    }

    pub(crate) fn plan_mut(&mut self, phase: P) -> Option<&mut PhasePlan<E, P>> {
        self.plans.get_mut(&phase)
    }

    pub fn recovery(&self) -> Option<P> {
        self.recovery
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.plans
            .values()
            .flat_map(|plan| plan.tasks.iter().map(|task| task.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeEnv, ScriptedTask, TestPhase};

    fn full_plans() -> BTreeMap<TestPhase, PhasePlan<FakeEnv, TestPhase>> {
        TestPhase::ALL
            .iter()
            .map(|phase| {
                let plan = PhasePlan::new()
                    .task(ScriptedTask::idle(&format!("{phase}-idle"), 9))
                    .exit(TestPhase::Ready);
                (*phase, plan)
            })
            .collect()
    }

    #[test]
    fn orders_tasks_by_priority_then_declaration() {
        let mut plans = full_plans();
        plans.insert(
            TestPhase::Ready,
            PhasePlan::new()
                .task(ScriptedTask::idle("late", 5))
                .task(ScriptedTask::idle("first-tie", 1))
                .task(ScriptedTask::idle("second-tie", 1))
                .exit(TestPhase::Waiting),
        );
        let machine = PhaseMachine::new(plans, None).expect("machine");
        let names: Vec<&str> = machine
            .plan(TestPhase::Ready)
            .expect("plan")
            .tasks()
            .iter()
            .map(|task| task.name())
            .collect();
        assert_eq!(names, vec!["first-tie", "second-tie", "late"]);
    }

    #[test]
    fn rejects_missing_or_empty_phases() {
        let mut plans = full_plans();
        plans.remove(&TestPhase::Cooldown);
        let err = PhaseMachine::new(plans, None).err().expect("missing plan");
        assert!(err.to_string().contains("cooldown has no plan"));

        let mut plans = full_plans();
        plans.insert(TestPhase::Waiting, PhasePlan::new().exit(TestPhase::Ready));
        let err = PhaseMachine::new(plans, None).err().expect("empty plan");
        assert!(err.to_string().contains("would stall"));
    }

    #[test]
    fn rejects_dead_end_phase_and_duplicate_names() {
        let mut plans = full_plans();
        plans.insert(
            TestPhase::Cleanup,
            PhasePlan::new().task(ScriptedTask::idle("drop", 0)),
        );
        let err = PhaseMachine::new(plans, None).err().expect("dead end");
        assert!(err.to_string().contains("neither exits nor a timeout"));

        let mut plans = full_plans();
        plans.insert(
            TestPhase::Cleanup,
            PhasePlan::new()
                .task(ScriptedTask::idle("ready-idle", 0))
                .exit(TestPhase::Ready),
        );
        let err = PhaseMachine::new(plans, None).err().expect("duplicate");
        assert!(err.to_string().contains("duplicate task name"));
    }

    #[test]
    fn timeout_counts_as_exit() {
        let mut plans = full_plans();
        plans.insert(
            TestPhase::Waiting,
            PhasePlan::new()
                .task(ScriptedTask::idle("wait", 0))
                .timeout(Duration::from_secs(30), TestPhase::Cleanup),
        );
        let machine = PhaseMachine::new(plans, Some(TestPhase::Cleanup)).expect("machine");
        let plan = machine.plan(TestPhase::Waiting).expect("plan");
        assert!(!plan.allows(TestPhase::Cleanup));
        assert_eq!(
            plan.timeout_rule(),
            Some(PhaseTimeout {
                after: Duration::from_secs(30),
                target: TestPhase::Cleanup
            })
        );
        assert_eq!(machine.recovery(), Some(TestPhase::Cleanup));
    }
}
