//! §4.A wire types: requests, views, and the venue error taxonomy every
//! adapter normalises onto regardless of the underlying REST dialect.

use chrono::{DateTime, Utc};
use mqk_schemas::{ExchangeId, Micros, OrderType, Side};

/// Hedge-mode slot an order or protection call targets. Computed from
/// `Position::side` + the venue's configured mode; never guessed at the
/// call site.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PositionDirection {
    OneWay,
    LongHedge,
    ShortHedge,
}

impl PositionDirection {
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

/// Whether a protection call replaces both legs or only one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProtectionMode {
    Full,
    Partial,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity_micros: Micros,
    pub limit_price_micros: Option<Micros>,
    pub reduce_only: bool,
    pub position_direction: PositionDirection,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlacedOrder {
    pub exchange_order_id: String,
    pub status: mqk_schemas::OrderStatus,
    pub filled_qty_micros: Micros,
    pub avg_fill_price_micros: Option<Micros>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PositionView {
    pub symbol: String,
    pub side: Side,
    pub quantity_micros: Micros,
    pub entry_price_micros: Micros,
    pub position_direction: PositionDirection,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BalanceEntry {
    pub total_micros: Micros,
    pub available_micros: Micros,
    pub locked_micros: Micros,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PriceTick {
    pub symbol: String,
    pub mark_price_micros: Micros,
    pub ts: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderStatusDelta {
    pub exchange_order_id: String,
    pub status: mqk_schemas::OrderStatus,
    pub filled_qty_micros: Micros,
    pub avg_fill_price_micros: Option<Micros>,
    pub ts: DateTime<Utc>,
}

/// §4.A / §7 error taxonomy. Every adapter normalises its venue's dialect
/// of rejection reasons onto this set so OrderExecutor and SLTPEngine never
/// branch on venue-specific strings.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayError {
    InvalidParams(String),
    InsufficientFunds,
    MinNotional,
    PositionModeMismatch,
    Throttled { retry_after_seconds: u32 },
    AuthFailed(String),
    Network(String),
    Unknown(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::InvalidParams(m) => write!(f, "invalid order params: {m}"),
            GatewayError::InsufficientFunds => write!(f, "insufficient funds"),
            GatewayError::MinNotional => write!(f, "below venue minimum notional"),
            GatewayError::PositionModeMismatch => write!(f, "wrong hedge/one-way slot"),
            GatewayError::Throttled {
                retry_after_seconds,
            } => write!(f, "throttled, retry after {retry_after_seconds}s"),
            GatewayError::AuthFailed(m) => write!(f, "authentication failed: {m}"),
            GatewayError::Network(m) => write!(f, "network error: {m}"),
            GatewayError::Unknown(m) => write!(f, "unknown gateway error: {m}"),
        }
    }
}

impl std::error::Error for GatewayError {}

pub type ExchangeResult<T> = Result<T, GatewayError>;

/// Identifies the venue an adapter speaks to, for logging/error context.
pub fn exchange_label(id: &ExchangeId) -> &str {
    &id.0
}
