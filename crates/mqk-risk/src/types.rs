use mqk_schemas::Micros;

/// Portfolio state RiskEvaluator's step 5 checks against. Supplied by the
/// caller (the coordinator, reading `mqk-portfolio`/`mqk-balance` state) —
/// this crate stays pure and has no knowledge of how the snapshot was
/// produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioSnapshot {
    pub open_positions: u32,
    pub open_positions_long: u32,
    pub open_positions_short: u32,
    /// Sum of `risk_amount_micros` across all currently open positions.
    pub aggregate_open_risk_micros: Micros,
    /// Negative means net loss. Reset by the caller at day boundary.
    pub daily_realised_pnl_micros: Micros,
    /// The balance risk-per-trade and max-total-risk percentages are taken
    /// against (the configured risk-basis balance).
    pub risk_basis_balance_micros: Micros,
}

/// Everything RiskEvaluator needs that the config layer resolves ahead of
/// time: the chosen profile's multiplier, the symbol's category multiplier
/// and leverage cap (or `None` if the symbol is uncategorized — default
/// multiplier 1.0, no extra leverage cap), and the portfolio thresholds.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedRiskContext {
    pub risk_multiplier: f64,
    pub category_multiplier: f64,
    pub category_max_leverage: Option<u32>,
    pub category_disallowed: bool,
    pub max_positions: u32,
    pub max_positions_per_direction: u32,
    pub max_total_risk_pct: f64,
    pub daily_loss_limit_pct: f64,
    /// Fraction of `risk_basis_balance_micros` targeted as risk on one trade
    /// before profile/category multipliers are applied.
    pub risk_per_trade_pct: f64,
    pub min_confidence: f64,
    pub venue_min_notional_micros: Micros,
    /// Safety margin applied on top of the venue minimum, e.g. `100_000` for
    /// a 10% floor.
    pub min_notional_safety_margin_pct_micros: i64,
    pub default_leverage: u32,
}

/// A sized, protection-checked intent ready for `OrderExecutor`.
#[derive(Clone, Debug, PartialEq)]
pub struct SizedIntent {
    pub quantity_micros: Micros,
    pub leverage: u32,
    pub effective_stop_loss_micros: Micros,
    pub effective_take_profit_micros: Micros,
    pub risk_amount_micros: Micros,
}

/// §4.F error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskRejection {
    BelowConfidence,
    RiskProfileExceeded,
    PortfolioFull,
    CategoryDisallowed,
    InvalidProtection,
    DailyLossLimit,
}

impl std::fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BelowConfidence => "confidence below configured minimum",
            Self::RiskProfileExceeded => "sized risk exceeds risk profile allowance",
            Self::PortfolioFull => "portfolio admission limit exceeded",
            Self::CategoryDisallowed => "asset category is disallowed",
            Self::InvalidProtection => "stop-loss/take-profit are not on the correct side of entry",
            Self::DailyLossLimit => "daily realised loss limit has been tripped",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for RiskRejection {}
