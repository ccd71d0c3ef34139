//! mqk-position-monitor — §4.I PositionMonitor.
//!
//! Drives `mqk_sltp::tick` from streaming mark prices, reconciles Order/
//! Position state from the venue's order-update stream, and runs a 30s
//! periodic safety net so protection transitions make progress even if a
//! stream event is dropped.

mod monitor;
mod types;

pub use monitor::PositionMonitor;
pub use types::MonitoredPosition;
