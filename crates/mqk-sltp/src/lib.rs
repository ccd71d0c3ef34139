//! mqk-sltp — §4.H SLTPEngine.
//!
//! A pure, deterministic tick function over `(Position, mark price,
//! ProtectionPlan)` producing at most one protection modification per call.
//! Carries no I/O and no clock of its own; `mqk-position-monitor` is the
//! production driver.

pub mod engine;
mod types;

pub use engine::{defensive_close_action, tick};
pub use types::{ProtectionAction, TickOutcome};
