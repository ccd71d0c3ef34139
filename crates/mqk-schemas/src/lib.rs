//! Cross-crate shared types for the trading coordination core.
//!
//! Every value that crosses a crate boundary — a Signal from a producer, an
//! Order row from the persistence layer, a Position mutated by the SL/TP
//! engine — is defined exactly once here. Enum wire forms are canonical
//! uppercase (`LONG`, `SHORT`, `FILLED`, ...) per the source-pattern notes:
//! string-valued enums crossing boundaries in mixed case are a recurring bug
//! source, so the canonical form is fixed at the type level and normalised on
//! ingress rather than left to each call site.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod fingerprint;

/// 1e-6 fixed-point scale shared by every price/quantity/amount field in the
/// core. Keeping money and fractional values as scaled integers avoids the
/// rounding drift that bit-for-bit float comparisons would otherwise hide in
/// the idempotence laws (reserve/release, replayed SL/TP ticks).
pub const MICROS_SCALE: i64 = 1_000_000;

/// A price, quantity, or balance amount, scaled by [`MICROS_SCALE`].
pub type Micros = i64;

// ---------------------------------------------------------------------------
// Side / direction
// ---------------------------------------------------------------------------

/// Canonical position/order direction. Always serialises uppercase.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for LONG, -1 for SHORT. Used to sign favourable-excursion math.
    pub fn sign(self) -> i64 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Hedge-mode position-direction slot, as seen by a venue that distinguishes
/// LONG and SHORT slots per symbol rather than a single net position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionDirection {
    /// Single net slot (venue is in one-way mode).
    OneWay,
    /// Hedge-mode LONG slot.
    LongHedge,
    /// Hedge-mode SHORT slot.
    ShortHedge,
}

impl PositionDirection {
    /// Derive the slot a given side must route through, given whether the
    /// venue is configured in hedge mode. Never guesses: callers who observe
    /// a `PositionModeMismatch` must re-derive, not retry the same slot.
    pub fn for_side(side: Side, hedge_mode: bool) -> Self {
        if !hedge_mode {
            return PositionDirection::OneWay;
        }
        match side {
            Side::Long => PositionDirection::LongHedge,
            Side::Short => PositionDirection::ShortHedge,
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange / endpoint identifiers
// ---------------------------------------------------------------------------

/// Stable identifier for a configured exchange/venue (e.g. `"bybit"`,
/// `"binance"`). Newtype rather than a bare `String` so call sites can't
/// accidentally swap an exchange id for a symbol.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeId(pub String);

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExchangeId {
    fn from(s: &str) -> Self {
        ExchangeId(s.to_string())
    }
}

/// Coarse-grained grouping of venue API calls that share a rate limit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    MarketData,
    Order,
    Position,
    Account,
}

impl std::fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndpointClass::MarketData => "market_data",
            EndpointClass::Order => "order",
            EndpointClass::Position => "position",
            EndpointClass::Account => "account",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// SL/TP expression
// ---------------------------------------------------------------------------

/// A stop-loss or take-profit as the producer expressed it: an absolute
/// price, or a percent-of-entry distance. Exactly one form is ever carried
/// per signal field — never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlTp {
    Absolute { price_micros: Micros },
    /// `pct_micros` is the distance from entry scaled by [`MICROS_SCALE`]
    /// (e.g. 3% == 30_000). Sign convention: always positive; direction is
    /// implied by side + whether this is SL or TP.
    Percent { pct_micros: i64 },
}

impl SlTp {
    /// Resolve to an absolute price given the entry price and whether this
    /// value is a stop-loss (moves against favourable direction) or a
    /// take-profit (moves with it).
    pub fn resolve(&self, entry_price_micros: Micros, side: Side, is_stop_loss: bool) -> Micros {
        match self {
            SlTp::Absolute { price_micros } => *price_micros,
            SlTp::Percent { pct_micros } => {
                let distance = mul_div(entry_price_micros, *pct_micros, MICROS_SCALE);
                let favourable_direction = side.sign();
                let stop_direction = if is_stop_loss {
                    -favourable_direction
                } else {
                    favourable_direction
                };
                entry_price_micros + stop_direction * distance
            }
        }
    }
}

/// Integer `a * b / c` without intermediate overflow for the ranges this
/// crate deals in (prices up to ~1e13 micros, percentages up to ~1e7 micros).
pub fn mul_div(a: i64, b: i64, c: i64) -> i64 {
    ((a as i128) * (b as i128) / (c as i128)) as i64
}

/// Ceiling variant of [`mul_div`]. Used wherever rounding must never land
/// below a threshold (minimum-notional adjustment must round the quantity
/// *up*, never down to a value that re-fails the check it was meant to fix).
pub fn mul_div_ceil(a: i64, b: i64, c: i64) -> i64 {
    let num = (a as i128) * (b as i128);
    let c = c as i128;
    let q = num / c;
    let r = num % c;
    if r != 0 {
        (q + 1) as i64
    } else {
        q as i64
    }
}

/// Minimum-notional adjustment per §4.A: a `place_order` request whose
/// notional (price × qty) is below the venue minimum is rounded *up* to the
/// minimum with a safety margin, reported back as an adjusted quantity.
///
/// `safety_margin_pct_micros` is the extra margin above the bare minimum,
/// scaled by [`MICROS_SCALE`] (e.g. `100_000` == 10%).
/// Returns the original quantity unchanged if it already clears the
/// margin-adjusted minimum.
pub fn round_up_to_min_notional(
    qty_micros: Micros,
    price_micros: Micros,
    min_notional_micros: Micros,
    safety_margin_pct_micros: i64,
) -> Micros {
    if price_micros <= 0 {
        return qty_micros;
    }
    let notional = mul_div(qty_micros, price_micros, MICROS_SCALE);
    let min_required = mul_div_ceil(
        min_notional_micros,
        MICROS_SCALE + safety_margin_pct_micros,
        MICROS_SCALE,
    );
    if notional >= min_required {
        return qty_micros;
    }
    mul_div_ceil(min_required, MICROS_SCALE, price_micros)
}

// ---------------------------------------------------------------------------
// MlHints
// ---------------------------------------------------------------------------

/// Raw probability/confidence components a producer may attach to a signal.
/// The core never recomputes `confidence` from these — it treats confidence
/// as the producer-supplied scalar of record — but persists the components
/// alongside it so a future diagnostic pass can see how a producer arrived
/// at its composite score without re-deriving it from logs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MlHints {
    pub profit_probability: Option<f64>,
    pub loss_probability: Option<f64>,
    pub confidence: Option<f64>,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Intent to open a position, produced by a strategy or ML component.
/// Immutable once accepted; never mutated after construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub strategy_id: String,
    pub suggested_entry_price_micros: Micros,
    pub stop_loss: SlTp,
    pub take_profit: SlTp,
    /// In [0, 1]; enforced at construction via [`Signal::validate`].
    pub confidence: f64,
    pub producer_ts: DateTime<Utc>,
    pub leverage: Option<u32>,
    pub risk_profile: Option<String>,
    pub ml_hints: Option<MlHints>,
}

/// Reasons a [`Signal`] fails its own structural invariants, independent of
/// any downstream dedup/risk decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignalValidationError {
    EmptySymbol,
    ConfidenceOutOfRange,
}

impl std::fmt::Display for SignalValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalValidationError::EmptySymbol => write!(f, "signal symbol must be non-empty"),
            SignalValidationError::ConfidenceOutOfRange => {
                write!(f, "signal confidence must be in [0, 1]")
            }
        }
    }
}

impl std::error::Error for SignalValidationError {}

impl Signal {
    pub fn validate(&self) -> Result<(), SignalValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(SignalValidationError::EmptySymbol);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SignalValidationError::ConfidenceOutOfRange);
        }
        Ok(())
    }
}

/// 64-bit content digest over `(symbol, side, strategy_id, timestamp floored
/// to one-minute granularity)`. Two signals sharing a fingerprint within the
/// deduplication window are treated as the same signal. See
/// [`fingerprint::fingerprint_signal`] for the derivation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalFingerprint(pub u64);

impl std::fmt::Display for SignalFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopMarket,
    TakeProfitMarket,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// One venue-side order: entry, SL, TP, or a protection modification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub exchange: ExchangeId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub requested_qty_micros: Micros,
    pub filled_qty_micros: Micros,
    pub avg_fill_price_micros: Option<Micros>,
    pub status: OrderStatus,
    pub position_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub exchange_order_id: Option<String>,
    pub idempotency_key: String,
}

impl Order {
    /// Invariant: filled quantity never exceeds requested quantity.
    pub fn is_valid(&self) -> bool {
        self.filled_qty_micros <= self.requested_qty_micros
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// An open exposure on one symbol under one strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub exchange: ExchangeId,
    pub symbol: String,
    pub side: Side,
    pub entry_price_micros: Micros,
    /// Decreases with partial closes; invariant `0 < current <= initial`.
    pub current_qty_micros: Micros,
    pub initial_qty_micros: Micros,
    pub leverage: u32,
    pub active_sl_micros: Option<Micros>,
    pub active_tp_micros: Option<Micros>,
    /// Running maximum of side-signed favourable percent since open, scaled
    /// by [`MICROS_SCALE`] (e.g. 2.5% == 25_000).
    pub highest_favourable_pct_micros: i64,
    /// Bit `i` set once partial-TP ladder level `i` has been taken.
    pub partial_tp_bitmask: u32,
    pub breakeven_armed: bool,
    pub trailing_armed: bool,
    pub protection_update_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Side-signed profit in percent of entry, scaled by [`MICROS_SCALE`].
    pub fn favourable_pct_micros(&self, mark_price_micros: Micros) -> i64 {
        let delta = mark_price_micros - self.entry_price_micros;
        let signed = delta * self.side.sign();
        mul_div(signed, MICROS_SCALE, self.entry_price_micros)
    }

    /// `true` if `sl` sits on the protective side of entry for this side.
    /// LONG: SL must be below entry. SHORT: SL must be above entry. A
    /// breakeven/lock transition may intentionally move SL past entry on the
    /// profitable side — that case is validated by the caller as "strictly
    /// more protective than before", not by this structural check.
    pub fn sl_on_correct_side(&self, sl_micros: Micros) -> bool {
        match self.side {
            Side::Long => sl_micros < self.entry_price_micros,
            Side::Short => sl_micros > self.entry_price_micros,
        }
    }

    pub fn is_open(&self) -> bool {
        self.current_qty_micros > 0
    }
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    Held,
    Released,
    Committed,
}

/// A hold on [`BalanceLedger`]-cached balance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub exchange: ExchangeId,
    pub currency: String,
    pub amount_micros: Micros,
    /// Free-form tag referencing the originating signal or order.
    pub purpose: String,
    pub created_at: DateTime<Utc>,
    pub state: ReservationState,
}

// ---------------------------------------------------------------------------
// WorkerLease
// ---------------------------------------------------------------------------

/// A named role slot; at most one holder at any instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerLease {
    pub role: String,
    pub holder_id: String,
    pub last_heartbeat: DateTime<Utc>,
    pub metadata: std::collections::BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// RateBucket (reporting view; live bucket state lives in mqk-ratelimiter)
// ---------------------------------------------------------------------------

/// A read-only snapshot of one (exchange, endpoint-class) sliding window, as
/// surfaced on the status operational endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateBucketUsage {
    pub exchange: ExchangeId,
    pub endpoint_class: EndpointClass,
    pub window_seconds: u32,
    pub limit_weight: u32,
    pub current_weight: u32,
}

// ---------------------------------------------------------------------------
// ProtectionPlan
// ---------------------------------------------------------------------------

/// One entry of the trailing-stop configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    pub activation_profit_pct_micros: i64,
    pub trailing_distance_pct_micros: i64,
}

/// One entry of the breakeven-lift configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakevenConfig {
    pub activation_profit_pct_micros: i64,
    pub offset_pct_micros: i64,
}

/// One rung of the profit-lock ladder: once `trigger_profit_pct_micros` is
/// reached, SL must be at least `locked_profit_pct_micros` in profit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfitLockRung {
    pub trigger_profit_pct_micros: i64,
    pub locked_profit_pct_micros: i64,
}

/// One rung of the partial take-profit ladder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialTpRung {
    pub trigger_profit_pct_micros: i64,
    /// Fraction of `initial_qty_micros` to close, scaled by [`MICROS_SCALE`].
    pub close_fraction_micros: i64,
}

/// Bound to each [`Position`]; derived from strategy defaults and signal
/// hints at position-open time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtectionPlan {
    pub initial_stop_distance_pct_micros: i64,
    pub initial_take_distance_pct_micros: i64,
    pub trailing: Option<TrailingConfig>,
    pub breakeven: Option<BreakevenConfig>,
    /// Sorted ascending by `trigger_profit_pct_micros`.
    pub profit_lock_ladder: Vec<ProfitLockRung>,
    /// Sorted ascending by `trigger_profit_pct_micros`; fractions sum to <= 1.
    pub partial_tp_ladder: Vec<PartialTpRung>,
    /// Cap on `Position::protection_update_count` before further trailing
    /// adjustments are disabled (partial-TP ladder continues regardless).
    pub max_protection_updates: u32,
}

impl ProtectionPlan {
    /// Structural invariant: ladder entries sorted ascending and partial-TP
    /// fractions sum to at most one full position.
    pub fn is_valid(&self) -> bool {
        let sorted_profit_lock = self
            .profit_lock_ladder
            .windows(2)
            .all(|w| w[0].trigger_profit_pct_micros <= w[1].trigger_profit_pct_micros);
        let sorted_partial_tp = self
            .partial_tp_ladder
            .windows(2)
            .all(|w| w[0].trigger_profit_pct_micros <= w[1].trigger_profit_pct_micros);
        let fraction_sum: i64 = self
            .partial_tp_ladder
            .iter()
            .map(|r| r.close_fraction_micros)
            .sum();
        sorted_profit_lock && sorted_partial_tp && fraction_sum <= MICROS_SCALE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), 1);
        assert_eq!(Side::Short.sign(), -1);
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn position_direction_one_way_ignores_side() {
        assert_eq!(
            PositionDirection::for_side(Side::Long, false),
            PositionDirection::OneWay
        );
        assert_eq!(
            PositionDirection::for_side(Side::Short, false),
            PositionDirection::OneWay
        );
    }

    #[test]
    fn position_direction_hedge_mode_splits_by_side() {
        assert_eq!(
            PositionDirection::for_side(Side::Long, true),
            PositionDirection::LongHedge
        );
        assert_eq!(
            PositionDirection::for_side(Side::Short, true),
            PositionDirection::ShortHedge
        );
    }

    #[test]
    fn sl_tp_percent_resolves_below_entry_for_long_stop_loss() {
        let sl = SlTp::Percent { pct_micros: 30_000 }; // 3%
        let resolved = sl.resolve(50_000 * MICROS_SCALE, Side::Long, true);
        assert_eq!(resolved, 48_500 * MICROS_SCALE);
    }

    #[test]
    fn sl_tp_percent_resolves_above_entry_for_long_take_profit() {
        let tp = SlTp::Percent { pct_micros: 50_000 }; // 5%
        let resolved = tp.resolve(50_000 * MICROS_SCALE, Side::Long, false);
        assert_eq!(resolved, 52_500 * MICROS_SCALE);
    }

    #[test]
    fn signal_validate_rejects_empty_symbol() {
        let sig = Signal {
            symbol: "  ".to_string(),
            side: Side::Long,
            strategy_id: "ml".to_string(),
            suggested_entry_price_micros: 1,
            stop_loss: SlTp::Absolute { price_micros: 1 },
            take_profit: SlTp::Absolute { price_micros: 2 },
            confidence: 0.5,
            producer_ts: Utc::now(),
            leverage: None,
            risk_profile: None,
            ml_hints: None,
        };
        assert_eq!(sig.validate(), Err(SignalValidationError::EmptySymbol));
    }

    #[test]
    fn signal_validate_rejects_out_of_range_confidence() {
        let mut sig = Signal {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            strategy_id: "ml".to_string(),
            suggested_entry_price_micros: 1,
            stop_loss: SlTp::Absolute { price_micros: 1 },
            take_profit: SlTp::Absolute { price_micros: 2 },
            confidence: 1.2,
            producer_ts: Utc::now(),
            leverage: None,
            risk_profile: None,
            ml_hints: None,
        };
        assert_eq!(
            sig.validate(),
            Err(SignalValidationError::ConfidenceOutOfRange)
        );
        sig.confidence = 1.0;
        assert!(sig.validate().is_ok());
    }

    #[test]
    fn position_favourable_pct_signed_by_side() {
        let pos = Position {
            id: Uuid::nil(),
            exchange: ExchangeId::from("bybit"),
            symbol: "BTCUSDT".to_string(),
            side: Side::Short,
            entry_price_micros: 50_000 * MICROS_SCALE,
            current_qty_micros: MICROS_SCALE,
            initial_qty_micros: MICROS_SCALE,
            leverage: 1,
            active_sl_micros: None,
            active_tp_micros: None,
            highest_favourable_pct_micros: 0,
            partial_tp_bitmask: 0,
            breakeven_armed: false,
            trailing_armed: false,
            protection_update_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        // Price drops 2% -> favourable for SHORT.
        let fav = pos.favourable_pct_micros(49_000 * MICROS_SCALE);
        assert_eq!(fav, 20_000);
    }

    #[test]
    fn min_notional_leaves_sufficient_quantity_untouched() {
        // $3.20 notional at 1.00 price, $3 minimum with 10% margin => $3.30 required.
        let qty = round_up_to_min_notional(
            4 * MICROS_SCALE,
            1 * MICROS_SCALE,
            3 * MICROS_SCALE,
            100_000,
        );
        assert_eq!(qty, 4 * MICROS_SCALE);
    }

    #[test]
    fn min_notional_rounds_up_insufficient_quantity() {
        // $3.20 notional, $5 minimum with 10% margin => need >= $5.50.
        let qty = round_up_to_min_notional(
            3_200_000,
            1 * MICROS_SCALE,
            5 * MICROS_SCALE,
            100_000,
        );
        let notional = mul_div(qty, MICROS_SCALE, MICROS_SCALE);
        assert!(notional >= 5_500_000);
    }

    #[test]
    fn min_notional_exactly_at_minimum_is_unchanged() {
        // Notional already equals the margin-adjusted minimum exactly.
        let qty = round_up_to_min_notional(
            5_500_000,
            1 * MICROS_SCALE,
            5 * MICROS_SCALE,
            100_000,
        );
        assert_eq!(qty, 5_500_000);
    }

    #[test]
    fn protection_plan_validates_sorted_ladders_and_fraction_sum() {
        let plan = ProtectionPlan {
            initial_stop_distance_pct_micros: 30_000,
            initial_take_distance_pct_micros: 50_000,
            trailing: None,
            breakeven: None,
            profit_lock_ladder: vec![],
            partial_tp_ladder: vec![
                PartialTpRung {
                    trigger_profit_pct_micros: 20_000,
                    close_fraction_micros: 300_000,
                },
                PartialTpRung {
                    trigger_profit_pct_micros: 30_000,
                    close_fraction_micros: 300_000,
                },
                PartialTpRung {
                    trigger_profit_pct_micros: 40_000,
                    close_fraction_micros: 400_000,
                },
            ],
            max_protection_updates: 5,
        };
        assert!(plan.is_valid());
    }
}
