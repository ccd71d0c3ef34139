//! §4.C/§4.K Reconciliation: local-vs-exchange drift detection, the arm/start
//! gate, the system-wide arm state, and the balance-reconciliation task.
//!
//! Architectural decisions:
//! - Broker snapshot reconciliation required before LIVE
//! - Divergence triggers HALT
//! - Unknown broker order triggers HALT
//! - Position mismatch triggers HALT
//! - Clean reconcile required before arming
//!
//! `engine`/`gate`/`watermark`/`types` are deterministic, pure logic — no IO,
//! no broker calls. `arm_state` builds on `gate`'s `DriftAction` to track the
//! system-wide armed/disarmed flag. `balance_task` is the one async, IO-doing
//! module in this crate: the lease-gated periodic loop that refreshes
//! `mqk_balance::BalanceLedger` from `ExchangeAdapter::fetch_balance`.

mod arm_state;
mod balance_task;
mod engine;
mod gate; // arm/start gate + drift tick
mod types;
mod watermark; // snapshot freshness + monotonicity watermark

pub mod snapshot_adapter;

// reconcile_monotonic is the required production path; it enforces snapshot
// monotonicity via SnapshotWatermark before running content comparison.
// StaleBrokerSnapshot is returned when a snapshot fails the watermark check.
pub use engine::{is_clean_reconcile, reconcile, reconcile_monotonic, StaleBrokerSnapshot};

// Mandatory gate API for arm/start and periodic drift monitoring.
pub use arm_state::{ArmState, DisarmReason};
pub use balance_task::{run_once as run_balance_reconciliation_once, spawn_balance_reconciliation};
pub use gate::{check_arm_gate, check_start_gate, reconcile_tick, ArmStartGate, DriftAction};
pub use snapshot_adapter::{
    normalize, normalize_json, normalize_lenient, RawBrokerOrder, RawBrokerPosition,
    RawBrokerSnapshot, SnapshotAdapterError,
};
pub use types::*;
// Snapshot freshness + monotonicity enforcement.
pub use watermark::{SnapshotFreshness, SnapshotWatermark};
