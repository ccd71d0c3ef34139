//! Builds the per-signal [`ResolvedRiskContext`] from static configuration.
//! `mqk-risk::evaluate` is pure and config-agnostic; this is the one place
//! that reaches into `CoreConfig` on its behalf.

use mqk_config::{CoreConfig, ExchangeConfig};
use mqk_risk::ResolvedRiskContext;
use mqk_schemas::Signal;

/// §7 / §4.F: the minimum-notional floor is padded by at least 10% so a
/// signal sized right at the venue's stated minimum doesn't get bounced by
/// intra-tick price movement before the order reaches the venue. Config
/// carries `min_notional_micros` per exchange but no separate safety-margin
/// knob, so the floor itself is fixed here rather than threaded through
/// another config section.
pub const MIN_NOTIONAL_SAFETY_MARGIN_PCT_MICROS: i64 = 100_000;

const DEFAULT_RISK_PROFILE: &str = "standard";
const DEFAULT_LEVERAGE: u32 = 1;

/// Resolve everything `mqk_risk::evaluate` needs for one signal: the named
/// risk profile (falling back to `"standard"` when the signal doesn't name
/// one, or when it names one the config doesn't define), the asset category
/// the signal's symbol belongs to (if any), and the exchange's venue floor.
pub fn resolve_risk_context(
    core: &CoreConfig,
    exchange_cfg: &ExchangeConfig,
    signal: &Signal,
) -> ResolvedRiskContext {
    let profile_name = signal
        .risk_profile
        .as_deref()
        .unwrap_or(DEFAULT_RISK_PROFILE);
    let risk_multiplier = core
        .risk_profiles
        .get(profile_name)
        .or_else(|| core.risk_profiles.get(DEFAULT_RISK_PROFILE))
        .map(|p| p.risk_multiplier)
        .unwrap_or(1.0);

    let category = core.category_for_symbol(&signal.symbol);
    let category_multiplier = category.map(|(_, c)| c.multiplier).unwrap_or(1.0);
    let category_max_leverage = category.map(|(_, c)| c.max_leverage);
    let category_disallowed = category.map(|(_, c)| c.disallowed).unwrap_or(false);

    ResolvedRiskContext {
        risk_multiplier,
        category_multiplier,
        category_max_leverage,
        category_disallowed,
        max_positions: core.portfolio_limits.max_positions,
        max_positions_per_direction: core.portfolio_limits.max_positions_per_direction,
        max_total_risk_pct: core.portfolio_limits.max_total_risk_pct,
        daily_loss_limit_pct: core.portfolio_limits.daily_loss_limit_pct,
        risk_per_trade_pct: core.risk_per_trade_pct,
        min_confidence: core.min_confidence,
        venue_min_notional_micros: exchange_cfg.min_notional_micros,
        min_notional_safety_margin_pct_micros: MIN_NOTIONAL_SAFETY_MARGIN_PCT_MICROS,
        default_leverage: DEFAULT_LEVERAGE,
    }
}
