//! Lifecycle events published on every signal/order/position transition:
//! once to the in-process broadcast bus the HTTP surface's SSE stream reads
//! from, and once to the append-only [`mqk_audit::AuditWriter`] so the
//! decision trail survives a restart.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use mqk_risk::RiskRejection;
use mqk_schemas::{ExchangeId, Side};

/// One notable transition in the signal -> position pipeline. `Serialize`
/// so both the audit log and the SSE bus can carry it as JSON without a
/// second representation.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    SignalAccepted {
        exchange: ExchangeId,
        symbol: String,
        side: Side,
        ts: DateTime<Utc>,
    },
    SignalRejectedDuplicate {
        exchange: ExchangeId,
        symbol: String,
        ts: DateTime<Utc>,
    },
    SignalRejectedByRisk {
        exchange: ExchangeId,
        symbol: String,
        reason: String,
        ts: DateTime<Utc>,
    },
    SignalRejectedDisarmed {
        exchange: ExchangeId,
        symbol: String,
        reason: String,
        ts: DateTime<Utc>,
    },
    EntryRejectedByVenue {
        exchange: ExchangeId,
        symbol: String,
        reason: String,
        ts: DateTime<Utc>,
    },
    PositionOpened {
        exchange: ExchangeId,
        position_id: Uuid,
        symbol: String,
        side: Side,
        quantity_micros: i64,
        ts: DateTime<Utc>,
    },
    PositionUnprotected {
        exchange: ExchangeId,
        position_id: Uuid,
        reason: String,
        ts: DateTime<Utc>,
    },
    PositionClosed {
        exchange: ExchangeId,
        position_id: Uuid,
        realised_pnl_micros: i64,
        ts: DateTime<Utc>,
    },
    LeaseAcquired {
        exchange: ExchangeId,
        ts: DateTime<Utc>,
    },
    LeaseLost {
        exchange: ExchangeId,
        ts: DateTime<Utc>,
    },
    Disarmed {
        exchange: ExchangeId,
        reason: String,
        ts: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Topic the audit writer files this under; mirrors the SSE bus's
    /// `BusMsg` topic-per-kind grouping a daemon's SSE bus typically uses.
    pub fn topic(&self) -> &'static str {
        match self {
            LifecycleEvent::SignalAccepted { .. }
            | LifecycleEvent::SignalRejectedDuplicate { .. }
            | LifecycleEvent::SignalRejectedByRisk { .. }
            | LifecycleEvent::SignalRejectedDisarmed { .. } => "signal",
            LifecycleEvent::EntryRejectedByVenue { .. } => "order",
            LifecycleEvent::PositionOpened { .. }
            | LifecycleEvent::PositionUnprotected { .. }
            | LifecycleEvent::PositionClosed { .. } => "position",
            LifecycleEvent::LeaseAcquired { .. } | LifecycleEvent::LeaseLost { .. } => "lease",
            LifecycleEvent::Disarmed { .. } => "arm",
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::SignalAccepted { .. } => "accepted",
            LifecycleEvent::SignalRejectedDuplicate { .. } => "rejected_duplicate",
            LifecycleEvent::SignalRejectedByRisk { .. } => "rejected_by_risk",
            LifecycleEvent::SignalRejectedDisarmed { .. } => "rejected_disarmed",
            LifecycleEvent::EntryRejectedByVenue { .. } => "rejected_by_venue",
            LifecycleEvent::PositionOpened { .. } => "opened",
            LifecycleEvent::PositionUnprotected { .. } => "unprotected",
            LifecycleEvent::PositionClosed { .. } => "closed",
            LifecycleEvent::LeaseAcquired { .. } => "acquired",
            LifecycleEvent::LeaseLost { .. } => "lost",
            LifecycleEvent::Disarmed { .. } => "disarmed",
        }
    }
}

pub fn risk_rejection_reason(r: RiskRejection) -> String {
    r.to_string()
}
