//! §4.A `ExchangeAdapter`: the object-safe async trait every venue
//! implementation satisfies. Grounded on `mqk-md`'s `Provider` trait —
//! object-safe, `Send + Sync`, default methods where a venue may not
//! support a capability.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use mqk_schemas::{EndpointClass, ExchangeId};
use tokio_stream::Stream;

use crate::types::{
    BalanceEntry, ExchangeResult, OrderRequest, OrderStatusDelta, PlacedOrder, PositionDirection,
    PositionView, PriceTick, ProtectionMode,
};

pub type PriceStream = Pin<Box<dyn Stream<Item = PriceTick> + Send>>;
pub type OrderUpdateStream = Pin<Box<dyn Stream<Item = OrderStatusDelta> + Send>>;

/// Uniform venue contract (§4.A). Implementations must be `Send + Sync` so a
/// single adapter instance can be shared across the coordinator's tasks.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> &ExchangeId;

    /// Idempotent given `idempotency_key`: a retried call with the same key
    /// must not duplicate the order. Minimum-notional rounding has already
    /// been applied by the caller (RiskEvaluator/OrderExecutor); this call
    /// additionally rejects with `MinNotional` if the venue still considers
    /// the rounded quantity too small (precision truncation edge case).
    async fn place_order(
        &self,
        request: &OrderRequest,
        idempotency_key: &str,
    ) -> ExchangeResult<PlacedOrder>;

    async fn cancel_order(&self, exchange_order_id: &str) -> ExchangeResult<()>;

    async fn set_position_protection(
        &self,
        symbol: &str,
        position_direction: PositionDirection,
        stop_loss_micros: Option<mqk_schemas::Micros>,
        take_profit_micros: Option<mqk_schemas::Micros>,
        mode: ProtectionMode,
    ) -> ExchangeResult<()>;

    async fn fetch_positions(&self) -> ExchangeResult<Vec<PositionView>>;

    async fn fetch_balance(&self) -> ExchangeResult<BTreeMap<String, BalanceEntry>>;

    /// Infinite, restartable on disconnect; callers drive reconnection by
    /// re-invoking this after the stream ends.
    async fn subscribe_prices(&self, symbols: &[String]) -> ExchangeResult<PriceStream>;

    async fn subscribe_order_updates(&self) -> ExchangeResult<OrderUpdateStream>;

    /// Endpoint class this adapter's write calls should be rate-limited
    /// under by default. Overridable per call site; exposed so
    /// OrderExecutor/SLTPEngine don't hardcode venue-specific classes.
    fn default_order_endpoint_class(&self) -> EndpointClass {
        EndpointClass::Order
    }
}
