//! World context handed to filters and extractors
//!
//! The world adapter owns the connection; the pipeline only asks it who "self"
//! is, how far away things are, and how far perception reaches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Accepts `{"x":..,"y":..,"z":..}` or `[x, y, z]`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::new(
                map.get("x")?.as_f64()?,
                map.get("y")?.as_f64()?,
                map.get("z")?.as_f64()?,
            )),
            Value::Array(items) if items.len() == 3 => Some(Self::new(
                items[0].as_f64()?,
                items[1].as_f64()?,
                items[2].as_f64()?,
            )),
            _ => None,
        }
    }
}

/// What filters and extractors may ask of the world.
pub trait PerceptionContext: Send + Sync {
    /// Username of the agent itself.
    fn self_name(&self) -> &str;

    /// Current position of the agent, if spawned.
    fn self_position(&self) -> Option<Position>;

    /// Maximum distance at which entities are perceived.
    fn max_distance(&self) -> f64;

    fn is_self(&self, entity: &Value) -> bool {
        entity.get("username").and_then(Value::as_str) == Some(self.self_name())
    }

    /// Stable identifier for an entity: `id`, then `uuid`, then `username`.
    fn entity_id(&self, entity: &Value) -> String {
        ["id", "uuid", "username"]
            .iter()
            .filter_map(|field| entity.get(*field))
            .find_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn distance_to_pos(&self, pos: &Position) -> Option<f64> {
        self.self_position().map(|own| own.distance_to(pos))
    }

    fn distance_to(&self, entity: &Value) -> Option<f64> {
        let pos = Position::from_value(entity.get("position")?)?;
        self.distance_to_pos(&pos)
    }
}

/// A context frozen at one moment; enough for hosts that rebuild it per tick.
#[derive(Clone, Debug)]
pub struct FixedContext {
    pub name: String,
    pub position: Option<Position>,
    pub max_distance: f64,
}

impl FixedContext {
    pub fn new(name: impl Into<String>, max_distance: f64) -> Self {
        Self { name: name.into(), position: None, max_distance }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

impl PerceptionContext for FixedContext {
    fn self_name(&self) -> &str {
        &self.name
    }

    fn self_position(&self) -> Option<Position> {
        self.position
    }

    fn max_distance(&self) -> f64 {
        self.max_distance
    }
}
