//! Abstraction over the game-automation host.
//!
//! The [`Environment`] trait is the only way the scheduler and scripts observe
//! or change the outside world. `&self` accessors are live reads (never cached
//! across ticks); `&mut self` operations return `false` when the host rejects
//! the interaction. Tests use an in-memory implementation from `test_support`.

use serde::{Deserialize, Serialize};

use crate::io::events::EventSender;

/// World coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub x: i32,
    pub y: i32,
    pub plane: i32,
}

impl Tile {
    pub fn new(x: i32, y: i32, plane: i32) -> Self {
        Self { x, y, plane }
    }

    /// Chebyshev distance; `u32::MAX` across planes.
    pub fn distance(&self, other: &Tile) -> u32 {
        if self.plane != other.plane {
            return u32::MAX;
        }
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

/// A nearby NPC or object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: u32,
    pub name: String,
    pub position: Tile,
    pub actions: Vec<String>,
}

impl Entity {
    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|candidate| candidate == action)
    }
}

/// Nearest-match filter for [`Environment::nearest_entity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityQuery {
    pub name: Option<String>,
    pub id: Option<u32>,
    pub action: Option<String>,
    pub max_distance: Option<u32>,
}

impl EntityQuery {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn within(mut self, distance: u32) -> Self {
        self.max_distance = Some(distance);
        self
    }

    /// Returns true if `entity`, seen from `origin`, satisfies every set field.
    pub fn matches(&self, entity: &Entity, origin: &Tile) -> bool {
        if let Some(name) = &self.name {
            if &entity.name != name {
                return false;
            }
        }
        if let Some(id) = self.id {
            if entity.id != id {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if !entity.has_action(action) {
                return false;
            }
        }
        if let Some(max) = self.max_distance {
            if origin.distance(&entity.position) > max {
                return false;
            }
        }
        true
    }
}

/// Snapshot of the controlled character.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacterState {
    pub position: Tile,
    pub animating: bool,
    pub moving: bool,
    pub health: u32,
    pub max_health: u32,
    pub prayer: u32,
}

impl CharacterState {
    pub fn is_idle(&self) -> bool {
        !self.animating && !self.moving
    }

    /// Health as a percentage of maximum, 0 when maximum is unknown.
    pub fn health_percent(&self) -> u32 {
        if self.max_health == 0 {
            return 0;
        }
        self.health.saturating_mul(100) / self.max_health
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraState {
    pub yaw: u16,
    pub pitch: u16,
    pub zoom: u16,
}

/// Query/command surface of the external game-automation API.
pub trait Environment {
    // Inventory
    fn inventory_count(&self, item: &str) -> u32;
    fn inventory_free_slots(&self) -> u32;
    fn interact_item(&mut self, item: &str, action: &str) -> bool;

    fn inventory_contains(&self, item: &str) -> bool {
        self.inventory_count(item) > 0
    }

    fn inventory_full(&self) -> bool {
        self.inventory_free_slots() == 0
    }

    // Equipment
    fn is_equipped(&self, item: &str) -> bool;
    fn equip(&mut self, item: &str) -> bool;

    // Bank
    fn bank_is_open(&self) -> bool;
    fn open_bank(&mut self) -> bool;
    fn withdraw(&mut self, item: &str, amount: u32) -> bool;
    fn deposit(&mut self, item: &str, amount: u32) -> bool;
    fn deposit_all(&mut self) -> bool;

    // Entities
    fn nearest_entity(&self, query: &EntityQuery) -> Option<Entity>;
    fn interact_entity(&mut self, entity: &Entity, action: &str) -> bool;

    // Character
    fn character(&self) -> CharacterState;

    // Camera
    fn camera(&self) -> CameraState;
    fn rotate_camera(&mut self, yaw: u16, pitch: u16) -> bool;
    fn set_zoom(&mut self, zoom: u16) -> bool;
    fn turn_camera_to(&mut self, entity: &Entity) -> bool;
    fn in_viewport(&self, entity: &Entity) -> bool;

    /// Register an observer for chat and game messages.
    ///
    /// Implementations forward messages into `sink` from whatever thread the
    /// host delivers them on. They must not call back into the scheduler.
    fn subscribe(&mut self, sink: EventSender);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, x: i32, actions: &[&str]) -> Entity {
        Entity {
            id: 7,
            name: name.to_string(),
            position: Tile::new(x, 0, 0),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn distance_is_chebyshev_on_same_plane() {
        let a = Tile::new(0, 0, 0);
        assert_eq!(a.distance(&Tile::new(3, -5, 0)), 5);
        assert_eq!(a.distance(&Tile::new(0, 0, 1)), u32::MAX);
    }

    #[test]
    fn query_checks_every_field() {
        let origin = Tile::default();
        let rock = entity("Rock", 4, &["Tap", "Examine"]);
        assert!(EntityQuery::named("Rock").matches(&rock, &origin));
        assert!(
            EntityQuery::named("Rock")
                .with_action("Tap")
                .within(4)
                .matches(&rock, &origin)
        );
        assert!(!EntityQuery::named("Rock").within(3).matches(&rock, &origin));
        assert!(
            !EntityQuery::named("Rock")
                .with_action("Mine")
                .matches(&rock, &origin)
        );
        assert!(!EntityQuery::named("Tree").matches(&rock, &origin));
    }

    #[test]
    fn health_percent_handles_unknown_max() {
        let mut state = CharacterState::default();
        assert_eq!(state.health_percent(), 0);
        state.health = 30;
        state.max_health = 60;
        assert_eq!(state.health_percent(), 50);
    }
}
