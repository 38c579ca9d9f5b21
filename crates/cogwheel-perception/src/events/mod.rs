//! Stock perception events
//!
//! Each constructor returns a fresh definition with its own tracking state, so
//! two pipelines never share what they have seen.

pub mod damage_taken;
pub mod item_collected;
pub mod sneak_toggle;

use crate::definition::PerceptionEvent;

pub use damage_taken::{damage_taken, DamageCause, DamageSource, DamageTaken};
pub use item_collected::{item_collected, ItemCollected};
pub use sneak_toggle::{sneak_toggle, SneakToggle};

/// Every stock definition, in registration order.
pub fn stock_definitions() -> Vec<Box<dyn PerceptionEvent>> {
    vec![
        Box::new(damage_taken()),
        Box::new(item_collected()),
        Box::new(sneak_toggle()),
    ]
}
