//! Asynchronous event delivery and rule matching.
//!
//! Host callbacks push [`GameEvent`]s through an [`EventSender`]; the
//! scheduler drains the queue at the top of each tick and applies matching
//! [`EventRule`]s. Observers never touch the script context directly.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tracing::{debug, warn};

use crate::core::types::Phase;
use crate::io::config::EventRuleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Chat,
    Game,
}

/// A text payload delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEvent {
    pub kind: EventKind,
    pub text: String,
}

impl GameEvent {
    pub fn chat(text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Chat,
            text: text.into(),
        }
    }

    pub fn game(text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Game,
            text: text.into(),
        }
    }
}

/// Cloneable producer side handed to environment observers.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<GameEvent>,
}

impl EventSender {
    /// Queue an event. Returns false once the scheduler has been dropped.
    pub fn publish(&self, event: GameEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Consumer side owned by the scheduler.
#[derive(Debug)]
pub struct EventQueue {
    tx: Sender<GameEvent>,
    rx: Receiver<GameEvent>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Take every event queued so far, in delivery order.
    pub fn drain(&self) -> Vec<GameEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                // The queue holds its own sender, so this only happens during teardown.
                Err(TryRecvError::Disconnected) => break,
            }
        }
        if !events.is_empty() {
            debug!(count = events.len(), "drained events");
        }
        events
    }
}

/// What happens when a rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction<P> {
    /// Mark an interrupt flag pending.
    RaiseFlag(String),
    /// Force a phase change (terminal message for the current objective).
    TransitionTo(P),
}

/// A compiled message pattern bound to an action.
#[derive(Debug, Clone)]
pub struct EventRule<P> {
    pattern: Regex,
    action: EventAction<P>,
}

impl<P: Phase> EventRule<P> {
    pub fn raise(pattern: &str, flag: impl Into<String>) -> Result<Self> {
        Ok(Self {
            pattern: compile(pattern)?,
            action: EventAction::RaiseFlag(flag.into()),
        })
    }

    pub fn transition(pattern: &str, phase: P) -> Result<Self> {
        Ok(Self {
            pattern: compile(pattern)?,
            action: EventAction::TransitionTo(phase),
        })
    }

    pub fn matches(&self, event: &GameEvent) -> bool {
        self.pattern.is_match(&event.text)
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn action(&self) -> &EventAction<P> {
        &self.action
    }
}

impl<P: Phase> fmt::Display for EventRule<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            EventAction::RaiseFlag(flag) => write!(f, "/{}/ -> flag {flag}", self.pattern),
            EventAction::TransitionTo(phase) => {
                write!(f, "/{}/ -> phase {phase}", self.pattern)
            }
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("compile event pattern /{pattern}/"))
}

/// Compile configured rules for a script with phase type `P`.
pub fn compile_rules<P: Phase>(configs: &[EventRuleConfig]) -> Result<Vec<EventRule<P>>> {
    configs
        .iter()
        .map(|cfg| match (&cfg.flag, &cfg.phase) {
            (Some(flag), None) => EventRule::raise(&cfg.pattern, flag.clone()),
            (None, Some(name)) => {
                let phase = P::parse(name).ok_or_else(|| {
                    anyhow!("event /{}/ names unknown phase '{name}'", cfg.pattern)
                })?;
                EventRule::transition(&cfg.pattern, phase)
            }
            _ => bail!(
                "event /{}/ must set exactly one of `flag` or `phase`",
                cfg.pattern
            ),
        })
        .collect()
}

/// Apply rules to one event; returns the actions of every matching rule.
pub fn route<'a, P: Phase>(
    rules: &'a [EventRule<P>],
    event: &GameEvent,
) -> Vec<&'a EventRule<P>> {
    let matched: Vec<&EventRule<P>> = rules.iter().filter(|rule| rule.matches(event)).collect();
    if matched.is_empty() {
        debug!(text = %event.text, "event matched no rule");
    } else if matched.len() > 1 {
        warn!(text = %event.text, rules = matched.len(), "event matched several rules");
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestPhase;

    fn rule_cfg(pattern: &str, flag: Option<&str>, phase: Option<&str>) -> EventRuleConfig {
        EventRuleConfig {
            pattern: pattern.to_string(),
            flag: flag.map(str::to_string),
            phase: phase.map(str::to_string),
        }
    }

    #[test]
    fn queue_drains_in_delivery_order() {
        let queue = EventQueue::new();
        let sender = queue.sender();
        assert!(sender.publish(GameEvent::chat("one")));
        assert!(sender.publish(GameEvent::game("two")));
        let texts: Vec<String> = queue.drain().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn sender_works_from_another_thread() {
        let queue = EventQueue::new();
        let sender = queue.sender();
        std::thread::spawn(move || sender.publish(GameEvent::chat("from observer")))
            .join()
            .expect("join observer");
        assert_eq!(queue.drain(), vec![GameEvent::chat("from observer")]);
    }

    #[test]
    fn compile_rules_resolves_flags_and_phases() {
        let rules = compile_rules::<TestPhase>(&[
            rule_cfg("You are poisoned", Some("low_health"), None),
            rule_cfg("depleted", None, Some("cleanup")),
        ])
        .expect("compile");
        assert_eq!(
            rules[0].action(),
            &EventAction::RaiseFlag("low_health".to_string())
        );
        assert_eq!(
            rules[1].action(),
            &EventAction::TransitionTo(TestPhase::Cleanup)
        );
    }

    #[test]
    fn compile_rules_rejects_ambiguous_or_unknown() {
        let both = compile_rules::<TestPhase>(&[rule_cfg("x", Some("f"), Some("ready"))]);
        assert!(both.is_err());
        let neither = compile_rules::<TestPhase>(&[rule_cfg("x", None, None)]);
        assert!(neither.is_err());
        let unknown = compile_rules::<TestPhase>(&[rule_cfg("x", None, Some("nowhere"))]);
        let err = unknown.expect_err("unknown phase");
        assert!(err.to_string().contains("unknown phase"));
        let bad_regex = compile_rules::<TestPhase>(&[rule_cfg("(", Some("f"), None)]);
        assert!(bad_regex.is_err());
    }

    #[test]
    fn route_returns_every_matching_rule() {
        let rules = vec![
            EventRule::raise("harvester is full", "harvest_ready").expect("rule"),
            EventRule::transition("(?i)depleted", TestPhase::Cleanup).expect("rule"),
        ];
        let matched = route(&rules, &GameEvent::game("The rock is DEPLETED."));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].pattern(), "(?i)depleted");
    }
}
