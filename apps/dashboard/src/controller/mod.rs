//! Controller layer: UI events, intent parsing, and command orchestration.

pub mod events;
pub mod intents;
pub mod orchestration;
