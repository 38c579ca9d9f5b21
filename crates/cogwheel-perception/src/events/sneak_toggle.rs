//! Other players toggling sneak nearby

use crate::definition::{EventDefinition, ExtractError, Salience, SaliencyRule, SignalTemplate, SourceBinding};
use crate::saliency::DEFAULT_WINDOW;
use cogwheel_core::{Channel, Modality};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const SNEAK_FLAG: u64 = 0x02;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SneakToggle {
    pub entity_id: String,
    pub display_name: Option<String>,
    pub distance: f64,
    pub sneaking: bool,
}

fn is_sneaking(entity: &Value) -> bool {
    entity
        .pointer("/metadata/0")
        .and_then(Value::as_u64)
        .is_some_and(|flags| flags & SNEAK_FLAG != 0)
}

/// `entityUpdate(entity)`; every fifth sneak flip by the same player escalates.
pub fn sneak_toggle() -> EventDefinition<SneakToggle> {
    let last_state: Arc<Mutex<HashMap<String, bool>>> = Arc::default();

    let source = SourceBinding::new("entityUpdate", |ctx, args: &[Value]| {
        let entity = args.first().ok_or(ExtractError::MissingArgument(0))?;
        let distance = ctx
            .distance_to(entity)
            .ok_or_else(|| ExtractError::invalid(0, "entity has no position"))?;
        Ok(SneakToggle {
            entity_id: ctx.entity_id(entity),
            display_name: entity.get("username").and_then(Value::as_str).map(str::to_string),
            distance,
            sneaking: is_sneaking(entity),
        })
    })
    .filter(move |ctx, args| {
        let Some(entity) = args.first() else {
            return false;
        };
        if entity.get("type").and_then(Value::as_str) != Some("player") || ctx.is_self(entity) {
            return false;
        }

        let sneaking = is_sneaking(entity);
        let Ok(mut seen) = last_state.lock() else {
            return false;
        };
        if seen.insert(ctx.entity_id(entity), sneaking) == Some(sneaking) {
            return false;
        }

        ctx.distance_to(entity).is_some_and(|d| d <= ctx.max_distance())
    });

    EventDefinition::new("sneak_toggle", Modality::Sighted, "sneak_toggle", source)
        .saliency(
            SaliencyRule::derived(|p: &SneakToggle| format!("teabag:{}", p.entity_id), 5.0)
                .measured_by(Salience::Occurrences)
                .within(DEFAULT_WINDOW),
        )
        .signal(
            SignalTemplate::new("entity_attention", |p: &SneakToggle| {
                format!(
                    "Player {} is teabagging (rapid sneaking)",
                    p.display_name.as_deref().unwrap_or("unknown")
                )
            })
            .metadata(|p: &SneakToggle| {
                json!({
                    "kind": "player",
                    "action": "teabag",
                    "distance": p.distance,
                    "displayName": p.display_name,
                })
            }),
        )
        .routes([Channel::Conscious, Channel::Reflex, Channel::System])
}
