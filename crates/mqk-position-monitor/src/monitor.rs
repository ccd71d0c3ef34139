//! §4.I PositionMonitor.
//!
//! The sole production caller of `mqk_sltp::tick`. Owns one price
//! subscription and one order-update subscription per exchange, drives
//! protection transitions through `OrderExecutor`, and reconciles Order/
//! Position state from venue fill events. A periodic sweep re-runs every
//! open position's tick so progress is guaranteed even if a stream event is
//! dropped.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use mqk_exchange_gateway::{ExchangeAdapter, GatewayError, OrderStatusDelta, ProtectionMode};
use mqk_execution::OrderExecutor;
use mqk_ratelimiter::RateLimiter;
use mqk_schemas::{ExchangeId, Micros, Position, ProtectionPlan};

use crate::types::MonitoredPosition;

pub struct PositionMonitor<A: ExchangeAdapter> {
    exchange: ExchangeId,
    executor: OrderExecutor<A>,
    /// Shared with `TradingCoordinator`'s own `submit_entry` calls — the
    /// spec requires one rate limiter gate per exchange, not one per caller.
    rate_limiter: std::sync::Arc<StdMutex<RateLimiter>>,
    pool: PgPool,
    positions: RwLock<HashMap<Uuid, tokio::sync::Mutex<MonitoredPosition>>>,
    /// Last observed mark price per symbol, used by the periodic sweep when
    /// no fresh tick has arrived.
    last_mark: RwLock<HashMap<String, Micros>>,
    /// `exchange_order_id -> (position_id, order_id)`, populated whenever
    /// this monitor submits a reduce-only order it needs to reconcile later.
    pending_orders: RwLock<HashMap<String, Uuid>>,
}

impl<A: ExchangeAdapter> PositionMonitor<A> {
    pub fn new(
        exchange: ExchangeId,
        executor: OrderExecutor<A>,
        rate_limiter: std::sync::Arc<StdMutex<RateLimiter>>,
        pool: PgPool,
    ) -> Self {
        Self {
            exchange,
            executor,
            rate_limiter,
            pool,
            positions: RwLock::new(HashMap::new()),
            last_mark: RwLock::new(HashMap::new()),
            pending_orders: RwLock::new(HashMap::new()),
        }
    }

    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    /// Registers a freshly filled-and-protected position. Called by
    /// `TradingCoordinator` once `OrderExecutor::install_protection` has
    /// succeeded.
    pub async fn register_position(&self, position: Position, plan: ProtectionPlan, hedge_mode: bool) {
        let mut positions = self.positions.write().await;
        positions.insert(
            position.id,
            tokio::sync::Mutex::new(MonitoredPosition::new(position, plan, hedge_mode)),
        );
    }

    /// Registers a filled entry whose protection install failed (§7 /
    /// S5). The monitor retries the install on every tick and sweep until
    /// it succeeds; SLTPEngine is not invoked while unprotected.
    pub async fn register_unprotected(&self, position: Position, plan: ProtectionPlan, hedge_mode: bool) {
        let mut positions = self.positions.write().await;
        positions.insert(
            position.id,
            tokio::sync::Mutex::new(MonitoredPosition::unprotected(position, plan, hedge_mode)),
        );
    }

    pub async fn is_tracked(&self, position_id: Uuid) -> bool {
        self.positions.read().await.contains_key(&position_id)
    }

    /// Plain-data snapshot of every open, tracked position: `(symbol, side,
    /// current_qty_micros)`. No reconciliation types leak into this crate —
    /// callers that need a drift-check snapshot (e.g. `mqk-reconcile`'s
    /// position comparison) build it from this.
    pub async fn open_position_snapshot(&self) -> Vec<(String, mqk_schemas::Side, Micros)> {
        let positions = self.positions.read().await;
        let mut out = Vec::with_capacity(positions.len());
        for entry in positions.values() {
            let guard = entry.lock().await;
            if guard.position.is_open() {
                out.push((
                    guard.position.symbol.clone(),
                    guard.position.side,
                    guard.position.current_qty_micros,
                ));
            }
        }
        out
    }

    /// §4.I: one price tick. Drives every open position on `symbol`.
    pub async fn on_price_tick(&self, symbol: &str, mark_price_micros: Micros, now: DateTime<Utc>) {
        self.last_mark
            .write()
            .await
            .insert(symbol.to_string(), mark_price_micros);

        let positions = self.positions.read().await;
        for entry in positions.values() {
            let mut guard = entry.lock().await;
            if guard.position.symbol != symbol || !guard.position.is_open() {
                continue;
            }
            self.drive(&mut guard, mark_price_micros, now).await;
        }
    }

    /// §4.I periodic safety-net pass: re-evaluates every open, tracked
    /// position at its last known mark. Idempotent — positions with nothing
    /// new to do produce no action.
    pub async fn run_periodic_sweep(&self, now: DateTime<Utc>) {
        let last_mark = self.last_mark.read().await.clone();
        let positions = self.positions.read().await;
        for entry in positions.values() {
            let mut guard = entry.lock().await;
            if !guard.position.is_open() {
                continue;
            }
            let Some(mark) = last_mark.get(&guard.position.symbol).copied() else {
                continue;
            };
            self.drive(&mut guard, mark, now).await;
        }
    }

    async fn drive(&self, guard: &mut MonitoredPosition, mark_price_micros: Micros, now: DateTime<Utc>) {
        if guard.unprotected {
            self.retry_protection_install(guard, now).await;
            return;
        }

        let outcome = mqk_sltp::tick(&guard.position, mark_price_micros, &guard.plan, now);
        let Some(action) = outcome.action else {
            guard.position = outcome.position;
            self.persist(&guard.position).await;
            return;
        };

        match action {
            mqk_sltp::ProtectionAction::PartialClose {
                ladder_index,
                close_qty_micros,
            } => {
                let key = format!("{}-partial-{}", guard.position.id, ladder_index);
                let result = self
                    .executor
                    .submit_reduce_only(
                        &guard.position.symbol,
                        guard.position.side,
                        guard.hedge_mode,
                        close_qty_micros,
                        &key,
                        &self.rate_limiter,
                        now,
                    )
                    .await;
                match result {
                    Ok(placed) => {
                        self.pending_orders
                            .write()
                            .await
                            .insert(placed.exchange_order_id, guard.position.id);
                        guard.position = outcome.position;
                        self.persist(&guard.position).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, position_id = %guard.position.id, ladder_index, "partial close rejected, will retry next tick");
                    }
                }
            }
            mqk_sltp::ProtectionAction::MoveStopLoss { new_sl_micros } => {
                let result = self
                    .executor
                    .install_protection(
                        &guard.position.symbol,
                        guard.position.side,
                        guard.hedge_mode,
                        Some(new_sl_micros),
                        guard.position.active_tp_micros,
                        ProtectionMode::Partial,
                        &self.rate_limiter,
                        now,
                    )
                    .await;
                match result {
                    Ok(()) => {
                        guard.position = outcome.position;
                        self.persist(&guard.position).await;
                    }
                    Err(GatewayError::InvalidParams(reason)) => {
                        tracing::error!(position_id = %guard.position.id, %reason, "stop-loss move rejected as invalid, forcing defensive close");
                        self.defensive_close(guard, now).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, position_id = %guard.position.id, "stop-loss move failed, will retry next tick");
                    }
                }
            }
            mqk_sltp::ProtectionAction::ClosePosition => {
                self.defensive_close(guard, now).await;
            }
        }
    }

    async fn defensive_close(&self, guard: &mut MonitoredPosition, now: DateTime<Utc>) {
        let key = format!("{}-defensive-close", guard.position.id);
        let result = self
            .executor
            .submit_reduce_only(
                &guard.position.symbol,
                guard.position.side,
                guard.hedge_mode,
                guard.position.current_qty_micros,
                &key,
                &self.rate_limiter,
                now,
            )
            .await;
        match result {
            Ok(placed) => {
                self.pending_orders
                    .write()
                    .await
                    .insert(placed.exchange_order_id, guard.position.id);
                guard.position.current_qty_micros = 0;
                guard.position.updated_at = now;
                self.persist(&guard.position).await;
            }
            Err(e) => {
                tracing::error!(error = %e, position_id = %guard.position.id, "defensive close itself failed");
            }
        }
    }

    async fn retry_protection_install(&self, guard: &mut MonitoredPosition, now: DateTime<Utc>) {
        let result = self
            .executor
            .install_protection(
                &guard.position.symbol,
                guard.position.side,
                guard.hedge_mode,
                guard.position.active_sl_micros,
                guard.position.active_tp_micros,
                ProtectionMode::Full,
                &self.rate_limiter,
                now,
            )
            .await;
        match result {
            Ok(()) => {
                tracing::info!(position_id = %guard.position.id, attempts = guard.unprotected_attempts + 1, "protection installed, critical state clears");
                guard.unprotected = false;
                guard.unprotected_attempts = 0;
                self.persist(&guard.position).await;
            }
            Err(e) => {
                guard.unprotected_attempts += 1;
                tracing::error!(error = %e, position_id = %guard.position.id, attempts = guard.unprotected_attempts, "position remains unprotected");
            }
        }
    }

    /// §6 order-update reconciliation: applied against a position this
    /// monitor placed a reduce-only order for. Unknown `exchange_order_id`s
    /// (entry fills owned by `OrderExecutor`) are ignored here.
    pub async fn reconcile_order_update(&self, delta: &OrderStatusDelta) {
        let pending = self.pending_orders.read().await;
        let Some(&position_id) = pending.get(&delta.exchange_order_id) else {
            return;
        };
        drop(pending);

        let positions = self.positions.read().await;
        if let Some(entry) = positions.get(&position_id) {
            let mut guard = entry.lock().await;
            guard.position.updated_at = delta.ts;
            self.persist(&guard.position).await;
        }
    }

    async fn persist(&self, position: &Position) {
        if let Err(e) = mqk_db::position_upsert(&self.pool, position).await {
            tracing::error!(error = %e, position_id = %position.id, "position_upsert failed");
        }
    }
}

impl<A: ExchangeAdapter + 'static> PositionMonitor<A> {
    /// §4.I: the one subscription per (exchange, symbol-set), run until the
    /// stream ends or the adapter surfaces an error. Intended to be spawned
    /// as a long-lived task by `TradingCoordinator`.
    pub async fn run_price_loop(self: std::sync::Arc<Self>, symbols: Vec<String>) -> Result<(), GatewayError> {
        let mut stream = self.executor_adapter().subscribe_prices(&symbols).await?;
        while let Some(tick) = stream.next().await {
            self.on_price_tick(&tick.symbol, tick.mark_price_micros, tick.ts).await;
        }
        Ok(())
    }

    /// Consumes the venue's order-update stream for as long as it runs.
    pub async fn run_order_update_loop(self: std::sync::Arc<Self>) -> Result<(), GatewayError> {
        let mut stream = self.executor_adapter().subscribe_order_updates().await?;
        while let Some(delta) = stream.next().await {
            self.reconcile_order_update(&delta).await;
        }
        Ok(())
    }

    /// Spawns the §4.I periodic safety-net pass (default cadence 30s).
    pub fn spawn_periodic_sweep(
        self: std::sync::Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.run_periodic_sweep(Utc::now()).await;
            }
        })
    }

    fn executor_adapter(&self) -> &A {
        self.executor.adapter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_exchange_gateway::PaperExchangeAdapter;
    use mqk_schemas::{BreakevenConfig, PartialTpRung, Side, TrailingConfig, MICROS_SCALE};
    use std::sync::Arc;

    fn plan() -> ProtectionPlan {
        ProtectionPlan {
            initial_stop_distance_pct_micros: 3 * MICROS_SCALE / 100,
            initial_take_distance_pct_micros: 5 * MICROS_SCALE / 100,
            trailing: Some(TrailingConfig {
                activation_profit_pct_micros: MICROS_SCALE / 100,
                trailing_distance_pct_micros: MICROS_SCALE / 200,
            }),
            breakeven: Some(BreakevenConfig {
                activation_profit_pct_micros: MICROS_SCALE / 200,
                offset_pct_micros: 0,
            }),
            profit_lock_ladder: vec![],
            partial_tp_ladder: vec![PartialTpRung {
                trigger_profit_pct_micros: 2 * MICROS_SCALE / 100,
                close_fraction_micros: 3 * MICROS_SCALE / 10,
            }],
            max_protection_updates: 5,
        }
    }

    fn position(entry: Micros, qty: Micros) -> Position {
        Position {
            id: Uuid::new_v4(),
            exchange: ExchangeId::from("bybit"),
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_price_micros: entry,
            current_qty_micros: qty,
            initial_qty_micros: qty,
            leverage: 1,
            active_sl_micros: Some(entry - entry * 3 / 100),
            active_tp_micros: Some(entry + entry * 5 / 100),
            highest_favourable_pct_micros: 0,
            partial_tp_bitmask: 0,
            breakeven_armed: false,
            trailing_armed: false,
            protection_update_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn price_tick_dispatches_partial_close_and_persists_new_bitmask() {
        let exchange = ExchangeId::from("bybit");
        let adapter = Arc::new(PaperExchangeAdapter::new(exchange.clone()));
        adapter.set_mark_price("BTCUSDT", 51_000 * MICROS_SCALE);
        let executor = OrderExecutor::new(adapter);
        let rate_limiter = Arc::new(StdMutex::new(RateLimiter::new()));
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/nonexistent")
            .expect("lazy pool never connects eagerly");

        let monitor = PositionMonitor::new(exchange, executor, rate_limiter, pool);
        let entry = 50_000 * MICROS_SCALE;
        let pos = position(entry, MICROS_SCALE);
        let position_id = pos.id;
        monitor.register_position(pos, plan(), true).await;

        monitor
            .on_price_tick("BTCUSDT", 51_000 * MICROS_SCALE, Utc::now())
            .await;

        let positions = monitor.positions.read().await;
        let guard = positions.get(&position_id).unwrap().lock().await;
        assert_eq!(guard.position.partial_tp_bitmask & 1, 1);
        assert!(guard.position.current_qty_micros < MICROS_SCALE);
    }
}
