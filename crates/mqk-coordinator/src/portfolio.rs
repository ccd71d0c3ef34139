//! In-memory portfolio accounting feeding `mqk_risk::evaluate`'s admission
//! checks (§4.F step 5). `Position` carries no `risk_amount_micros` field —
//! that value is only ever known at sizing time — so the aggregate open
//! risk the risk engine checks against is tracked here rather than derived
//! from persisted position rows.

use std::collections::HashMap;
use std::sync::Mutex;

use mqk_risk::PortfolioSnapshot;
use mqk_schemas::{Micros, Side};
use uuid::Uuid;

struct OpenEntry {
    side: Side,
    risk_amount_micros: Micros,
}

/// Owned by one `TradingCoordinator`. Updated at entry-fill time (risk
/// entered) and at position-close time (risk released); read on every
/// incoming signal to build that signal's `PortfolioSnapshot`.
pub struct PortfolioState {
    inner: Mutex<Inner>,
}

struct Inner {
    open: HashMap<Uuid, OpenEntry>,
    daily_realised_pnl_micros: Micros,
    risk_basis_balance_micros: Micros,
}

impl PortfolioState {
    pub fn new(risk_basis_balance_micros: Micros) -> Self {
        Self {
            inner: Mutex::new(Inner {
                open: HashMap::new(),
                daily_realised_pnl_micros: 0,
                risk_basis_balance_micros,
            }),
        }
    }

    /// Current snapshot for risk evaluation.
    pub fn snapshot(&self) -> PortfolioSnapshot {
        let inner = self.inner.lock().expect("portfolio state poisoned");
        let open_positions_long = inner.open.values().filter(|e| e.side == Side::Long).count() as u32;
        let open_positions_short = inner.open.values().filter(|e| e.side == Side::Short).count() as u32;
        let aggregate_open_risk_micros = inner.open.values().map(|e| e.risk_amount_micros).sum();
        PortfolioSnapshot {
            open_positions: inner.open.len() as u32,
            open_positions_long,
            open_positions_short,
            aggregate_open_risk_micros,
            daily_realised_pnl_micros: inner.daily_realised_pnl_micros,
            risk_basis_balance_micros: inner.risk_basis_balance_micros,
        }
    }

    /// Records a newly opened position's risk, entered once its protection
    /// has been attached (or it has been registered unprotected — either
    /// way the position is now live exposure).
    pub fn record_open(&self, position_id: Uuid, side: Side, risk_amount_micros: Micros) {
        let mut inner = self.inner.lock().expect("portfolio state poisoned");
        inner.open.insert(
            position_id,
            OpenEntry {
                side,
                risk_amount_micros,
            },
        );
    }

    /// Releases a position's reserved risk and applies its realised PnL to
    /// the daily counter. Called once `PositionMonitor` reports the
    /// position fully closed.
    pub fn record_close(&self, position_id: Uuid, realised_pnl_micros: Micros) {
        let mut inner = self.inner.lock().expect("portfolio state poisoned");
        inner.open.remove(&position_id);
        inner.daily_realised_pnl_micros += realised_pnl_micros;
    }

    /// Resets the daily realised PnL counter at the configured day
    /// boundary (§4.F step 5's `daily_loss_limit_pct` check resets per
    /// trading day, not per process lifetime).
    pub fn reset_daily_pnl(&self) {
        self.inner.lock().expect("portfolio state poisoned").daily_realised_pnl_micros = 0;
    }

    pub fn set_risk_basis_balance(&self, risk_basis_balance_micros: Micros) {
        self.inner
            .lock()
            .expect("portfolio state poisoned")
            .risk_basis_balance_micros = risk_basis_balance_micros;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_open_positions_by_direction() {
        let state = PortfolioState::new(10_000 * mqk_schemas::MICROS_SCALE);
        state.record_open(Uuid::new_v4(), Side::Long, 100 * mqk_schemas::MICROS_SCALE);
        state.record_open(Uuid::new_v4(), Side::Short, 50 * mqk_schemas::MICROS_SCALE);
        let snap = state.snapshot();
        assert_eq!(snap.open_positions, 2);
        assert_eq!(snap.open_positions_long, 1);
        assert_eq!(snap.open_positions_short, 1);
        assert_eq!(snap.aggregate_open_risk_micros, 150 * mqk_schemas::MICROS_SCALE);
    }

    #[test]
    fn closing_a_position_releases_its_risk_and_applies_pnl() {
        let state = PortfolioState::new(10_000 * mqk_schemas::MICROS_SCALE);
        let id = Uuid::new_v4();
        state.record_open(id, Side::Long, 100 * mqk_schemas::MICROS_SCALE);
        state.record_close(id, -20 * mqk_schemas::MICROS_SCALE);
        let snap = state.snapshot();
        assert_eq!(snap.open_positions, 0);
        assert_eq!(snap.daily_realised_pnl_micros, -20 * mqk_schemas::MICROS_SCALE);
    }
}
