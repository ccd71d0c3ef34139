//! S3: a signal whose risk-based sizing would fall under the venue's
//! minimum notional is rounded up (never rejected) to clear the venue floor
//! plus its safety margin, per `mqk_coordinator::resolve_risk_context`.

use chrono::Utc;

use mqk_risk::{evaluate, PortfolioSnapshot};
use mqk_schemas::{mul_div, MICROS_SCALE};
use mqk_testkit::{sample_core_config, sample_signal};

fn flat_portfolio(balance_micros: i64) -> PortfolioSnapshot {
    PortfolioSnapshot {
        open_positions: 0,
        open_positions_long: 0,
        open_positions_short: 0,
        aggregate_open_risk_micros: 0,
        daily_realised_pnl_micros: 0,
        risk_basis_balance_micros: balance_micros,
    }
}

#[tokio::test]
async fn a_tiny_account_still_clears_the_venue_minimum_notional() {
    let now = Utc::now();
    let config = sample_core_config();
    let exchange_cfg = config.exchanges.get("bybit").unwrap().clone();
    let signal = sample_signal("ml", now);

    // A $50 account at 1% risk-per-trade sizes to well under the sample
    // exchange's 5 USDT minimum notional before rounding.
    let ctx = mqk_coordinator::resolve_risk_context(&config, &exchange_cfg, &signal);
    let portfolio = flat_portfolio(50 * MICROS_SCALE);

    let intent = evaluate(&signal, &ctx, &portfolio).expect("tiny sizing is rounded up, not rejected");

    let notional_micros = mul_div(
        intent.quantity_micros,
        signal.suggested_entry_price_micros,
        MICROS_SCALE,
    );
    let required_micros = mul_div(
        exchange_cfg.min_notional_micros,
        MICROS_SCALE + ctx.min_notional_safety_margin_pct_micros,
        MICROS_SCALE,
    );
    assert!(
        notional_micros >= required_micros,
        "sized notional {notional_micros} must clear the padded venue floor {required_micros}"
    );
}

#[tokio::test]
async fn a_well_funded_account_sizes_above_the_floor_without_any_rounding_adjustment() {
    let now = Utc::now();
    let config = sample_core_config();
    let exchange_cfg = config.exchanges.get("bybit").unwrap().clone();
    let signal = sample_signal("ml", now);

    let ctx = mqk_coordinator::resolve_risk_context(&config, &exchange_cfg, &signal);
    let portfolio = flat_portfolio(100_000 * MICROS_SCALE);

    let intent = evaluate(&signal, &ctx, &portfolio).unwrap();
    let notional_micros = mul_div(
        intent.quantity_micros,
        signal.suggested_entry_price_micros,
        MICROS_SCALE,
    );
    assert!(notional_micros > exchange_cfg.min_notional_micros * 10);
}
