//! Health drops, with a best-effort guess at what caused them
//!
//! The `health` callback carries the agent's own state as its first argument
//! and, optionally, the entities around it as an array in the second.

use crate::context::PerceptionContext;
use crate::definition::{EventDefinition, ExtractError, SignalTemplate, SourceBinding};
use cogwheel_core::{Channel, Modality};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DamageCause {
    Lava,
    Drown,
    Fire,
    Gravity,
    Player,
    Mob,
    Anvil,
    Explosion,
    Projectile,
    Unknown,
}

impl DamageCause {
    /// Guess from an entity name, for things that are neither players nor mobs.
    fn from_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.is_empty() {
            Self::Unknown
        } else if name.contains("anvil") {
            Self::Anvil
        } else if ["tnt", "creeper", "explosion"].iter().any(|n| name.contains(n)) {
            Self::Explosion
        } else if ["arrow", "trident", "snowball"].iter().any(|n| name.contains(n)) {
            Self::Projectile
        } else {
            Self::Unknown
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DamageSource {
    pub cause: DamageCause,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "entityId", skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

impl DamageSource {
    fn cause(cause: DamageCause) -> Self {
        Self { cause, name: None, entity_id: None, distance: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DamageTaken {
    pub amount: f64,
    pub health: f64,
    pub source: DamageSource,
}

#[derive(Debug, Default)]
struct HealthTracker {
    last_health: Option<f64>,
    pending: Option<f64>,
}

fn flag(state: &Value, field: &str) -> bool {
    state.get(field).and_then(Value::as_bool).unwrap_or(false)
}

fn infer_source(ctx: &dyn PerceptionContext, state: &Value, nearby: Option<&Value>) -> DamageSource {
    if flag(state, "isInLava") {
        return DamageSource::cause(DamageCause::Lava);
    }
    if flag(state, "isInWater") {
        return DamageSource::cause(DamageCause::Drown);
    }
    if flag(state, "isOnFire") || flag(state, "onFire") {
        return DamageSource::cause(DamageCause::Fire);
    }

    let falling = state.pointer("/velocity/y").and_then(Value::as_f64).is_some_and(|vy| vy < -0.2);
    let airborne = state.get("onGround").and_then(Value::as_bool) == Some(false);
    if falling && airborne {
        return DamageSource::cause(DamageCause::Gravity);
    }

    let nearest = nearby
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|e| !ctx.is_self(e))
        .filter_map(|e| ctx.distance_to(e).map(|d| (e, d)))
        .filter(|(_, d)| *d <= ctx.max_distance())
        .min_by(|a, b| a.1.total_cmp(&b.1));

    let Some((entity, distance)) = nearest else {
        return DamageSource::cause(DamageCause::Unknown);
    };

    let text = |field: &str| entity.get(field).and_then(Value::as_str).map(str::to_string);
    let cause = match entity.get("type").and_then(Value::as_str) {
        Some("player") => DamageCause::Player,
        Some("mob") => DamageCause::Mob,
        _ => DamageCause::from_name(&text("name").unwrap_or_default()),
    };
    if cause == DamageCause::Unknown {
        return DamageSource::cause(cause);
    }

    let name = match cause {
        DamageCause::Player | DamageCause::Mob => text("username").or_else(|| text("displayName")).or_else(|| text("name")),
        _ => text("name"),
    };
    DamageSource { cause, name, entity_id: Some(ctx.entity_id(entity)), distance: Some(distance) }
}

/// `health(selfState, nearby?)`; emits when health drops below the last seen value.
///
/// The first callback only primes the tracker.
pub fn damage_taken() -> EventDefinition<DamageTaken> {
    let tracker = Arc::new(Mutex::new(HealthTracker::default()));
    let filter_tracker = Arc::clone(&tracker);

    let source = SourceBinding::new("health", move |ctx, args: &[Value]| {
        let state = args.first().ok_or(ExtractError::MissingArgument(0))?;
        let health = state
            .get("health")
            .and_then(Value::as_f64)
            .ok_or_else(|| ExtractError::invalid(0, "health is not a number"))?;
        let amount = tracker
            .lock()
            .map_err(|_| ExtractError::Other("health tracker poisoned".into()))?
            .pending
            .take()
            .unwrap_or(0.0);
        Ok(DamageTaken { amount, health, source: infer_source(ctx, state, args.get(1)) })
    })
    .filter(move |_ctx, args| {
        let Some(current) = args.first().and_then(|s| s.get("health")).and_then(Value::as_f64) else {
            return false;
        };
        let Ok(mut tracker) = filter_tracker.lock() else {
            return false;
        };
        let previous = tracker.last_health.replace(current);
        tracker.pending = previous.map(|prev| prev - current).filter(|amount| *amount > 0.0);
        tracker.pending.is_some()
    });

    EventDefinition::new("damage_taken", Modality::Felt, "damage_taken", source)
        .signal(
            SignalTemplate::new("damage", |p: &DamageTaken| match &p.source.name {
                Some(name) => format!("Took {} damage from {} ({})", p.amount, name, cause_label(p.source.cause)),
                None => format!("Took {} damage ({})", p.amount, cause_label(p.source.cause)),
            })
            .payload_metadata(),
        )
        .routes([Channel::Conscious, Channel::Reflex])
}

fn cause_label(cause: DamageCause) -> &'static str {
    match cause {
        DamageCause::Lava => "lava",
        DamageCause::Drown => "drown",
        DamageCause::Fire => "fire",
        DamageCause::Gravity => "gravity",
        DamageCause::Player => "player",
        DamageCause::Mob => "mob",
        DamageCause::Anvil => "anvil",
        DamageCause::Explosion => "explosion",
        DamageCause::Projectile => "projectile",
        DamageCause::Unknown => "unknown",
    }
}
