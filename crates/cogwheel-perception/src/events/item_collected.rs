//! Item pickups by the agent itself

use crate::definition::{EventDefinition, ExtractError, Salience, SaliencyRule, SignalTemplate, SourceBinding};
use crate::saliency::DEFAULT_WINDOW;
use cogwheel_core::{Channel, Modality};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ItemCollected {
    pub item_name: String,
}

/// `playerCollect(collector, collected)`; escalates every third pickup.
pub fn item_collected() -> EventDefinition<ItemCollected> {
    let source = SourceBinding::new("playerCollect", |_ctx, args: &[Value]| {
        let collected = args.get(1).ok_or(ExtractError::MissingArgument(1))?;
        let item_name = ["name", "displayName", "type"]
            .iter()
            .find_map(|field| match collected.get(*field) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ItemCollected { item_name })
    })
    .filter(|ctx, args| {
        args.first()
            .and_then(|collector| collector.get("username"))
            .and_then(Value::as_str)
            == Some(ctx.self_name())
    });

    EventDefinition::new("item_collected", Modality::Felt, "item_collected", source)
        .saliency(
            SaliencyRule::fixed("felt:pickup", 3.0)
                .measured_by(Salience::Occurrences)
                .within(DEFAULT_WINDOW),
        )
        .signal(
            SignalTemplate::new("entity_attention", |_: &ItemCollected| "Picked up an item".to_string())
                .metadata(|p: &ItemCollected| {
                    json!({
                        "kind": "felt",
                        "action": "pickup",
                        "itemName": p.item_name,
                    })
                }),
        )
        .routes([Channel::Conscious, Channel::System])
}
