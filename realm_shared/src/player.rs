//! Player and entity value types.
//!
//! These are plain data carriers: the server's registry owns them after
//! registration and drives them through `advance`. Everything here is
//! serde-serializable because the same shape travels on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque entity id. Assigned once by the server at registration, never
/// reused or changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Units per second an entity moves while a direction is held.
pub const MOVE_SPEED: f32 = 64.0;

/// A capped resource gauge. Invariant: `current <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    pub current: f32,
    pub max: f32,
}

impl Gauge {
    /// A full gauge at the given maximum.
    pub fn full(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn is_valid(&self) -> bool {
        self.current.is_finite()
            && self.max.is_finite()
            && self.max >= 0.0
            && self.current <= self.max
    }
}

/// Movement direction carried by start/stop-move messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// A live thing in the world: identity, display name, motion state, and
/// capped resource gauges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub xv: f32,
    pub yv: f32,
    pub health: Gauge,
    pub energy: Gauge,
    pub spirit: Gauge,
}

impl Entity {
    /// A freshly spawned entity at the origin with full gauges. The id is
    /// provisional until the server assigns a real one.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EntityId(0),
            name: name.into(),
            x: 0.0,
            y: 0.0,
            xv: 0.0,
            yv: 0.0,
            health: Gauge::full(100.0),
            energy: Gauge::full(100.0),
            spirit: Gauge::full(100.0),
        }
    }

    /// Integrates position from velocity over `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        self.x += self.xv * dt;
        self.y += self.yv * dt;
    }

    /// Sets or clears the velocity component for a direction. Stopping a
    /// direction only zeroes the axis if the entity was moving that way.
    pub fn set_moving(&mut self, dir: Direction, starting: bool) {
        match dir {
            Direction::Up => Self::set_axis(&mut self.yv, -MOVE_SPEED, starting),
            Direction::Down => Self::set_axis(&mut self.yv, MOVE_SPEED, starting),
            Direction::Left => Self::set_axis(&mut self.xv, -MOVE_SPEED, starting),
            Direction::Right => Self::set_axis(&mut self.xv, MOVE_SPEED, starting),
        }
    }

    fn set_axis(axis: &mut f32, value: f32, starting: bool) {
        if starting {
            *axis = value;
        } else if *axis == value {
            *axis = 0.0;
        }
    }
}

/// Rejection reasons for a registration payload.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("payload is not a player: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("player name is empty")]
    EmptyName,
    #[error("{0} gauge violates current <= max")]
    InvalidGauge(&'static str),
    #[error("position or velocity is not finite")]
    NonFiniteMotion,
}

/// The thing registered and broadcast: one per live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Player {
    pub entity: Entity,
}

impl Player {
    pub fn new(entity: Entity) -> Self {
        Self { entity }
    }

    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    /// Parses a registration payload and validates it.
    pub fn from_json(payload: &[u8]) -> Result<Self, RegistrationError> {
        let player: Player = serde_json::from_slice(payload)?;
        player.validate()?;
        Ok(player)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Checks the structural invariants a registration must satisfy.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        let e = &self.entity;
        if e.name.trim().is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if !e.health.is_valid() {
            return Err(RegistrationError::InvalidGauge("health"));
        }
        if !e.energy.is_valid() {
            return Err(RegistrationError::InvalidGauge("energy"));
        }
        if !e.spirit.is_valid() {
            return Err(RegistrationError::InvalidGauge("spirit"));
        }
        if ![e.x, e.y, e.xv, e.yv].iter().all(|v| v.is_finite()) {
            return Err(RegistrationError::NonFiniteMotion);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_integrates_velocity() {
        let mut e = Entity::new("walker");
        e.set_moving(Direction::Right, true);
        e.advance(0.5);
        assert_eq!(e.x, MOVE_SPEED * 0.5);
        assert_eq!(e.y, 0.0);
    }

    #[test]
    fn stop_only_clears_matching_axis_value() {
        let mut e = Entity::new("walker");
        e.set_moving(Direction::Right, true);
        e.set_moving(Direction::Left, true);
        // Stopping "right" after reversing must not cancel the leftward move.
        e.set_moving(Direction::Right, false);
        assert_eq!(e.xv, -MOVE_SPEED);
        e.set_moving(Direction::Left, false);
        assert_eq!(e.xv, 0.0);
    }

    #[test]
    fn player_json_roundtrip() {
        let player = Player::new(Entity::new("Alice"));
        let bytes = player.to_json().unwrap();
        let back = Player::from_json(&bytes).unwrap();
        assert_eq!(player, back);
    }

    #[test]
    fn registration_rejects_empty_name() {
        let player = Player::new(Entity::new("  "));
        assert!(matches!(
            player.validate(),
            Err(RegistrationError::EmptyName)
        ));
    }

    #[test]
    fn registration_rejects_overfull_gauge() {
        let mut player = Player::new(Entity::new("Alice"));
        player.entity.energy.current = player.entity.energy.max + 1.0;
        assert!(matches!(
            player.validate(),
            Err(RegistrationError::InvalidGauge("energy"))
        ));
    }
}
