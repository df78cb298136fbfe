//! Test doubles for the scheduler seams: a manual clock, an in-memory
//! environment, scripted tasks and interrupts, and a four-phase enum.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::context::ScriptContext;
use crate::core::trigger::Trigger;
use crate::core::types::{InterruptOutcome, Outcome, Phase, Priority};
use crate::io::clock::Clock;
use crate::io::environment::{
    CameraState, CharacterState, Entity, EntityQuery, Environment, Tile,
};
use crate::io::events::{EventSender, GameEvent};
use crate::machine::PhasePlan;
use crate::script::{Script, ScriptBuilder};
use crate::task::{Interrupt, RunCtx, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestPhase {
    Ready,
    Waiting,
    Cleanup,
    Cooldown,
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestPhase::Ready => "ready",
            TestPhase::Waiting => "waiting",
            TestPhase::Cleanup => "cleanup",
            TestPhase::Cooldown => "cooldown",
        };
        f.write_str(name)
    }
}

impl Phase for TestPhase {
    const ALL: &'static [Self] = &[
        TestPhase::Ready,
        TestPhase::Waiting,
        TestPhase::Cleanup,
        TestPhase::Cooldown,
    ];
}

/// Builder for a `test` script starting in `ready`. Every phase holds one
/// never-applicable filler task and exits to `ready`; tests replace the
/// phases they exercise.
pub fn filler_builder() -> ScriptBuilder<FakeEnv, TestPhase> {
    let mut builder = Script::builder("test").initial_phase(TestPhase::Ready);
    for phase in TestPhase::ALL {
        builder = builder.phase(
            *phase,
            PhasePlan::new()
                .task(ScriptedTask::idle(&format!("{phase}-filler"), 99))
                .exit(TestPhase::Ready),
        );
    }
    builder
}

/// Clock that only moves when told to. `sleep` advances it instantly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Rc<Cell<Duration>>,
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
            sleeps: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }

    /// Time advanced since construction.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

/// State change applied when a matching interaction succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AddItem(String, u32),
    RemoveItem(String, u32),
    Animate(bool),
    SetHealth(u32),
    RemoveEntity(String),
    Emit(GameEvent),
}

#[derive(Debug, Clone)]
struct Reaction {
    target: String,
    action: String,
    effects: Vec<Effect>,
}

/// In-memory [`Environment`].
///
/// Items and entities are set up directly; interactions succeed unless the
/// target was rejected, and trigger any registered reactions. `Drop` and
/// `Eat` on an item remove one unit after reactions run.
#[derive(Debug)]
pub struct FakeEnv {
    capacity: u32,
    items: BTreeMap<String, u32>,
    bank: BTreeMap<String, u32>,
    bank_open: bool,
    equipped: BTreeSet<String>,
    entities: Vec<Entity>,
    next_entity_id: u32,
    character: CharacterState,
    camera: CameraState,
    offscreen: BTreeSet<String>,
    reactions: Vec<Reaction>,
    rejected: BTreeSet<String>,
    interactions: Vec<String>,
    subscribers: Vec<EventSender>,
}

impl Default for FakeEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEnv {
    pub fn new() -> Self {
        Self {
            capacity: 28,
            items: BTreeMap::new(),
            bank: BTreeMap::new(),
            bank_open: false,
            equipped: BTreeSet::new(),
            entities: Vec::new(),
            next_entity_id: 1,
            character: CharacterState {
                position: Tile::new(0, 0, 0),
                health: 10,
                max_health: 10,
                ..CharacterState::default()
            },
            camera: CameraState::default(),
            offscreen: BTreeSet::new(),
            reactions: Vec::new(),
            rejected: BTreeSet::new(),
            interactions: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn set_item(&mut self, item: &str, count: u32) {
        if count == 0 {
            self.items.remove(item);
        } else {
            self.items.insert(item.to_string(), count);
        }
    }

    /// Fill every free slot with `item`.
    pub fn fill_inventory(&mut self, item: &str) {
        let free = self.inventory_free_slots();
        let current = self.inventory_count(item);
        self.set_item(item, current + free);
    }

    pub fn set_bank_item(&mut self, item: &str, count: u32) {
        self.bank.insert(item.to_string(), count);
    }

    /// Place an entity `distance` tiles east of the character.
    pub fn spawn(&mut self, name: &str, distance: i32, actions: &[&str]) {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        let origin = self.character.position;
        self.entities.push(Entity {
            id,
            name: name.to_string(),
            position: Tile::new(origin.x + distance, origin.y, origin.plane),
            actions: actions.iter().map(|action| action.to_string()).collect(),
        });
    }

    pub fn despawn(&mut self, name: &str) {
        self.entities.retain(|entity| entity.name != name);
    }

    pub fn set_offscreen(&mut self, name: &str) {
        self.offscreen.insert(name.to_string());
    }

    pub fn set_health(&mut self, health: u32) {
        self.character.health = health;
    }

    pub fn set_animating(&mut self, animating: bool) {
        self.character.animating = animating;
    }

    /// Run `effects` whenever `action` on `target` succeeds.
    pub fn react(&mut self, target: &str, action: &str, effects: Vec<Effect>) {
        self.reactions.push(Reaction {
            target: target.to_string(),
            action: action.to_string(),
            effects,
        });
    }

    /// Make every interaction with `target` fail.
    pub fn reject(&mut self, target: &str) {
        self.rejected.insert(target.to_string());
    }

    /// Interactions attempted so far, as `target:action`.
    pub fn interactions(&self) -> &[String] {
        &self.interactions
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn emit_chat(&self, text: &str) {
        self.emit(GameEvent::chat(text));
    }

    pub fn emit_game(&self, text: &str) {
        self.emit(GameEvent::game(text));
    }

    fn emit(&self, event: GameEvent) {
        for sink in &self.subscribers {
            sink.publish(event.clone());
        }
    }

    fn interact(&mut self, target: &str, action: &str) -> bool {
        self.interactions.push(format!("{target}:{action}"));
        if self.rejected.contains(target) {
            return false;
        }
        let effects: Vec<Effect> = self
            .reactions
            .iter()
            .filter(|reaction| reaction.target == target && reaction.action == action)
            .flat_map(|reaction| reaction.effects.iter().cloned())
            .collect();
        for effect in effects {
            self.apply(effect);
        }
        true
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::AddItem(item, count) => {
                let current = self.inventory_count(&item);
                let added = count.min(self.inventory_free_slots());
                self.set_item(&item, current + added);
            }
            Effect::RemoveItem(item, count) => {
                let current = self.inventory_count(&item);
                self.set_item(&item, current.saturating_sub(count));
            }
            Effect::Animate(animating) => self.character.animating = animating,
            Effect::SetHealth(health) => {
                self.character.health = health.min(self.character.max_health);
            }
            Effect::RemoveEntity(name) => self.despawn(&name),
            Effect::Emit(event) => self.emit(event),
        }
    }
}

impl Environment for FakeEnv {
    fn inventory_count(&self, item: &str) -> u32 {
        self.items.get(item).copied().unwrap_or(0)
    }

    fn inventory_free_slots(&self) -> u32 {
        let used: u32 = self.items.values().sum();
        self.capacity.saturating_sub(used)
    }

    fn interact_item(&mut self, item: &str, action: &str) -> bool {
        if !self.inventory_contains(item) {
            self.interactions.push(format!("{item}:{action}"));
            return false;
        }
        if !self.interact(item, action) {
            return false;
        }
        if action == "Drop" || action == "Eat" {
            self.apply(Effect::RemoveItem(item.to_string(), 1));
        }
        true
    }

    fn is_equipped(&self, item: &str) -> bool {
        self.equipped.contains(item)
    }

    fn equip(&mut self, item: &str) -> bool {
        if !self.inventory_contains(item) || !self.interact(item, "Equip") {
            return false;
        }
        self.apply(Effect::RemoveItem(item.to_string(), 1));
        self.equipped.insert(item.to_string());
        true
    }

    fn bank_is_open(&self) -> bool {
        self.bank_open
    }

    fn open_bank(&mut self) -> bool {
        if !self.interact("Bank", "Open") {
            return false;
        }
        self.bank_open = true;
        true
    }

    fn withdraw(&mut self, item: &str, amount: u32) -> bool {
        let banked = self.bank.get(item).copied().unwrap_or(0);
        if !self.bank_open || banked < amount || self.inventory_free_slots() < amount {
            return false;
        }
        self.bank.insert(item.to_string(), banked - amount);
        let current = self.inventory_count(item);
        self.set_item(item, current + amount);
        true
    }

    fn deposit(&mut self, item: &str, amount: u32) -> bool {
        let current = self.inventory_count(item);
        if !self.bank_open || current < amount {
            return false;
        }
        self.set_item(item, current - amount);
        *self.bank.entry(item.to_string()).or_default() += amount;
        true
    }

    fn deposit_all(&mut self) -> bool {
        if !self.bank_open {
            return false;
        }
        for (item, count) in std::mem::take(&mut self.items) {
            *self.bank.entry(item).or_default() += count;
        }
        true
    }

    fn nearest_entity(&self, query: &EntityQuery) -> Option<Entity> {
        let origin = self.character.position;
        self.entities
            .iter()
            .filter(|entity| query.matches(entity, &origin))
            .min_by_key(|entity| origin.distance(&entity.position))
            .cloned()
    }

    fn interact_entity(&mut self, entity: &Entity, action: &str) -> bool {
        let present = self
            .entities
            .iter()
            .any(|candidate| candidate.id == entity.id && candidate.has_action(action));
        if !present {
            self.interactions.push(format!("{}:{action}", entity.name));
            return false;
        }
        self.interact(&entity.name, action)
    }

    fn character(&self) -> CharacterState {
        self.character
    }

    fn camera(&self) -> CameraState {
        self.camera
    }

    fn rotate_camera(&mut self, yaw: u16, pitch: u16) -> bool {
        self.camera.yaw = yaw;
        self.camera.pitch = pitch;
        true
    }

    fn set_zoom(&mut self, zoom: u16) -> bool {
        self.camera.zoom = zoom;
        true
    }

    fn turn_camera_to(&mut self, entity: &Entity) -> bool {
        self.interactions.push(format!("camera:{}", entity.name));
        self.offscreen.remove(&entity.name);
        true
    }

    fn in_viewport(&self, entity: &Entity) -> bool {
        !self.offscreen.contains(&entity.name)
    }

    fn subscribe(&mut self, sink: EventSender) {
        self.subscribers.push(sink);
    }
}

/// Task with a scripted outcome sequence and an externally toggled guard.
pub struct ScriptedTask {
    name: String,
    priority: Priority,
    outcomes: VecDeque<Outcome<TestPhase>>,
    fallback: Outcome<TestPhase>,
    cooldown: Option<Duration>,
    cost: Option<(ManualClock, Duration)>,
    gate: Rc<Cell<bool>>,
    runs: Rc<Cell<u32>>,
}

impl ScriptedTask {
    /// Applicable task that succeeds unless told otherwise.
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            priority: Priority(priority),
            outcomes: VecDeque::new(),
            fallback: Outcome::Success,
            cooldown: None,
            cost: None,
            gate: Rc::new(Cell::new(true)),
            runs: Rc::new(Cell::new(0)),
        }
    }

    /// Never applicable until its gate is opened.
    pub fn idle(name: &str, priority: u32) -> Self {
        let task = Self::new(name, priority);
        task.gate.set(false);
        task
    }

    /// Queue one outcome; queued outcomes are used before the fallback.
    pub fn then(mut self, outcome: Outcome<TestPhase>) -> Self {
        self.outcomes.push_back(outcome);
        self
    }

    pub fn always(mut self, outcome: Outcome<TestPhase>) -> Self {
        self.fallback = outcome;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Advance `clock` by `cost` on every run.
    pub fn takes(mut self, clock: &ManualClock, cost: Duration) -> Self {
        self.cost = Some((clock.clone(), cost));
        self
    }

    pub fn gate(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.gate)
    }

    pub fn runs(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.runs)
    }
}

impl<E: ?Sized> Task<E, TestPhase> for ScriptedTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn is_applicable(&self, _env: &E, _ctx: &ScriptContext<TestPhase>) -> bool {
        self.gate.get()
    }

    fn run(&mut self, _env: &mut E, _cx: &mut RunCtx<'_, TestPhase>) -> Outcome<TestPhase> {
        self.runs.set(self.runs.get() + 1);
        if let Some((clock, cost)) = &self.cost {
            clock.advance(*cost);
        }
        self.outcomes
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }
}

/// What a [`ScriptedInterrupt`] saw while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptObservation {
    pub phase: TestPhase,
    pub active: Option<String>,
}

/// Interrupt with a scripted outcome sequence.
pub struct ScriptedInterrupt {
    name: String,
    priority: Priority,
    trigger: Trigger,
    outcomes: VecDeque<InterruptOutcome>,
    fallback: InterruptOutcome,
    cost: Option<(ManualClock, Duration)>,
    gate: Rc<Cell<bool>>,
    runs: Rc<Cell<u32>>,
    observed: Rc<RefCell<Vec<InterruptObservation>>>,
}

impl ScriptedInterrupt {
    pub fn new(name: &str, priority: u32, trigger: Trigger) -> Self {
        Self {
            name: name.to_string(),
            priority: Priority(priority),
            trigger,
            outcomes: VecDeque::new(),
            fallback: InterruptOutcome::Success,
            cost: None,
            gate: Rc::new(Cell::new(true)),
            runs: Rc::new(Cell::new(0)),
            observed: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn then(mut self, outcome: InterruptOutcome) -> Self {
        self.outcomes.push_back(outcome);
        self
    }

    pub fn always(mut self, outcome: InterruptOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    pub fn takes(mut self, clock: &ManualClock, cost: Duration) -> Self {
        self.cost = Some((clock.clone(), cost));
        self
    }

    pub fn gate(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.gate)
    }

    pub fn runs(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.runs)
    }

    pub fn observed(&self) -> Rc<RefCell<Vec<InterruptObservation>>> {
        Rc::clone(&self.observed)
    }
}

impl<E: ?Sized> Interrupt<E, TestPhase> for ScriptedInterrupt {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    fn is_applicable(&self, _env: &E, _ctx: &ScriptContext<TestPhase>) -> bool {
        self.gate.get()
    }

    fn run(&mut self, _env: &mut E, cx: &mut RunCtx<'_, TestPhase>) -> InterruptOutcome {
        self.runs.set(self.runs.get() + 1);
        self.observed.borrow_mut().push(InterruptObservation {
            phase: cx.script().phase(),
            active: cx.script().active_interrupt().map(str::to_string),
        });
        if let Some((clock, cost)) = &self.cost {
            clock.advance(*cost);
        }
        self.outcomes
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
