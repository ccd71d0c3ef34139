//! §4.F RiskEvaluator pipeline: confidence admission -> profile resolution ->
//! asset-category adjustment -> base sizing -> confidence modulation ->
//! portfolio admission -> protection invariant checks.
//!
//! Deterministic, pure evaluation — no IO, no time, no broker calls — the
//! same discipline `mqk-portfolio`'s ledger follows, generalized here from
//! account-level kill switches to per-signal sizing and admission.

use mqk_schemas::{mul_div, round_up_to_min_notional, Side, Signal, MICROS_SCALE};

use crate::types::{PortfolioSnapshot, ResolvedRiskContext, RiskRejection, SizedIntent};

/// Bounded confidence-modulation factor derived from a signal's ML hints.
/// The composite `confidence` score is never recomputed here — only mapped,
/// clamped, into a size multiplier. Absent hints leave the base size
/// unmodulated (`1.0`).
fn ml_confidence_factor(signal: &Signal) -> f64 {
    let composite = signal
        .ml_hints
        .as_ref()
        .and_then(|h| h.confidence)
        .unwrap_or(signal.confidence);
    (0.5 + composite).clamp(0.5, 1.5)
}

fn pct_to_micros(pct: f64) -> i64 {
    (pct * MICROS_SCALE as f64).round() as i64
}

/// Evaluate one signal against the resolved risk context and current
/// portfolio snapshot. Returns a sized, protection-checked intent or the
/// first rejection reached, in spec-mandated evaluation order.
pub fn evaluate(
    signal: &Signal,
    ctx: &ResolvedRiskContext,
    portfolio: &PortfolioSnapshot,
) -> Result<SizedIntent, RiskRejection> {
    if signal.confidence < ctx.min_confidence {
        return Err(RiskRejection::BelowConfidence);
    }

    if ctx.category_disallowed {
        return Err(RiskRejection::CategoryDisallowed);
    }

    let entry = signal.suggested_entry_price_micros;
    let resolved_sl = signal.stop_loss.resolve(entry, signal.side, true);
    let resolved_tp = signal.take_profit.resolve(entry, signal.side, false);

    let stop_distance = (entry - resolved_sl).abs();
    if stop_distance <= 0 {
        return Err(RiskRejection::InvalidProtection);
    }

    let risk_basis = portfolio.risk_basis_balance_micros;
    let combined_multiplier = ctx.risk_multiplier * ctx.category_multiplier;
    let pct_micros = pct_to_micros(ctx.risk_per_trade_pct * combined_multiplier);
    let mut risk_amount_micros = mul_div(risk_basis, pct_micros, MICROS_SCALE);

    // ML/confidence modulation: bounded [0.5, 1.5], only ever scales the
    // already-admitted base size; it never overrides a rejection rule.
    let ml_factor = ml_confidence_factor(signal);
    risk_amount_micros = mul_div(risk_amount_micros, pct_to_micros(ml_factor), MICROS_SCALE);

    let mut quantity_micros = mul_div(risk_amount_micros, MICROS_SCALE, stop_distance);
    quantity_micros = round_up_to_min_notional(
        quantity_micros,
        entry,
        ctx.venue_min_notional_micros,
        ctx.min_notional_safety_margin_pct_micros,
    );

    let leverage = signal
        .leverage
        .unwrap_or(ctx.default_leverage)
        .min(ctx.category_max_leverage.unwrap_or(u32::MAX));

    let would_be_positions = portfolio.open_positions + 1;
    if would_be_positions > ctx.max_positions {
        return Err(RiskRejection::PortfolioFull);
    }
    let direction_count = match signal.side {
        Side::Long => portfolio.open_positions_long,
        Side::Short => portfolio.open_positions_short,
    };
    if direction_count + 1 > ctx.max_positions_per_direction {
        return Err(RiskRejection::PortfolioFull);
    }

    let daily_loss_limit_micros =
        -mul_div(risk_basis, pct_to_micros(ctx.daily_loss_limit_pct), MICROS_SCALE);
    if portfolio.daily_realised_pnl_micros <= daily_loss_limit_micros {
        return Err(RiskRejection::DailyLossLimit);
    }

    let max_total_risk_micros =
        mul_div(risk_basis, pct_to_micros(ctx.max_total_risk_pct), MICROS_SCALE);
    if portfolio.aggregate_open_risk_micros + risk_amount_micros > max_total_risk_micros {
        return Err(RiskRejection::RiskProfileExceeded);
    }

    let protection_ok = match signal.side {
        Side::Long => resolved_sl < entry && entry < resolved_tp,
        Side::Short => resolved_tp < entry && entry < resolved_sl,
    };
    if !protection_ok {
        return Err(RiskRejection::InvalidProtection);
    }

    Ok(SizedIntent {
        quantity_micros,
        leverage,
        effective_stop_loss_micros: resolved_sl,
        effective_take_profit_micros: resolved_tp,
        risk_amount_micros,
    })
}
