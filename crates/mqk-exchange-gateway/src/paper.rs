//! Deterministic in-memory adapter used by tests and dry-run deployments.
//! Grounded on `mqk-broker-paper`'s locked, deterministic fill model — no
//! network, no clock reads beyond what the caller supplies, fills happen
//! immediately at the requested price.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use mqk_schemas::{ExchangeId, Micros, OrderStatus};
use uuid::Uuid;

use crate::adapter::{ExchangeAdapter, OrderUpdateStream, PriceStream};
use crate::types::{
    BalanceEntry, ExchangeResult, GatewayError, OrderRequest, OrderStatusDelta, PlacedOrder,
    PositionDirection, PositionView, ProtectionMode,
};

struct PaperState {
    balances: BTreeMap<String, BalanceEntry>,
    positions: BTreeMap<(String, PositionDirection), PositionView>,
    seen_idempotency_keys: BTreeMap<String, PlacedOrder>,
    mark_prices: BTreeMap<String, Micros>,
}

/// Fills every order immediately at the signal's limit price (or the
/// adapter's configured mark price for market orders). Deterministic: no
/// randomness, no wall-clock dependency beyond timestamps it's handed.
pub struct PaperExchangeAdapter {
    exchange: ExchangeId,
    state: Mutex<PaperState>,
}

impl PaperExchangeAdapter {
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            state: Mutex::new(PaperState {
                balances: BTreeMap::new(),
                positions: BTreeMap::new(),
                seen_idempotency_keys: BTreeMap::new(),
                mark_prices: BTreeMap::new(),
            }),
        }
    }

    pub fn seed_balance(&self, currency: &str, entry: BalanceEntry) {
        self.state
            .lock()
            .expect("paper state poisoned")
            .balances
            .insert(currency.to_string(), entry);
    }

    pub fn set_mark_price(&self, symbol: &str, price_micros: Micros) {
        self.state
            .lock()
            .expect("paper state poisoned")
            .mark_prices
            .insert(symbol.to_string(), price_micros);
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchangeAdapter {
    fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    async fn place_order(
        &self,
        request: &OrderRequest,
        idempotency_key: &str,
    ) -> ExchangeResult<PlacedOrder> {
        let mut state = self.state.lock().expect("paper state poisoned");

        if let Some(existing) = state.seen_idempotency_keys.get(idempotency_key) {
            return Ok(existing.clone());
        }

        if request.quantity_micros <= 0 {
            return Err(GatewayError::InvalidParams(
                "quantity must be positive".to_string(),
            ));
        }

        let fill_price = request
            .limit_price_micros
            .or_else(|| state.mark_prices.get(&request.symbol).copied())
            .ok_or_else(|| {
                GatewayError::InvalidParams("no price available to fill market order".to_string())
            })?;

        let placed = PlacedOrder {
            exchange_order_id: Uuid::new_v4().to_string(),
            status: OrderStatus::Filled,
            filled_qty_micros: request.quantity_micros,
            avg_fill_price_micros: Some(fill_price),
        };

        state
            .positions
            .insert((request.symbol.clone(), request.position_direction), PositionView {
                symbol: request.symbol.clone(),
                side: request.side,
                quantity_micros: request.quantity_micros,
                entry_price_micros: fill_price,
                position_direction: request.position_direction,
            });

        state
            .seen_idempotency_keys
            .insert(idempotency_key.to_string(), placed.clone());

        Ok(placed)
    }

    async fn cancel_order(&self, _exchange_order_id: &str) -> ExchangeResult<()> {
        Ok(())
    }

    async fn set_position_protection(
        &self,
        _symbol: &str,
        _position_direction: PositionDirection,
        stop_loss_micros: Option<Micros>,
        take_profit_micros: Option<Micros>,
        _mode: ProtectionMode,
    ) -> ExchangeResult<()> {
        if stop_loss_micros.is_none() && take_profit_micros.is_none() {
            return Err(GatewayError::InvalidParams(
                "protection call with neither SL nor TP".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch_positions(&self) -> ExchangeResult<Vec<PositionView>> {
        Ok(self
            .state
            .lock()
            .expect("paper state poisoned")
            .positions
            .values()
            .cloned()
            .collect())
    }

    async fn fetch_balance(&self) -> ExchangeResult<BTreeMap<String, BalanceEntry>> {
        Ok(self.state.lock().expect("paper state poisoned").balances.clone())
    }

    async fn subscribe_prices(&self, _symbols: &[String]) -> ExchangeResult<PriceStream> {
        Ok(Box::pin(tokio_stream::empty()))
    }

    async fn subscribe_order_updates(&self) -> ExchangeResult<OrderUpdateStream> {
        Ok(Box::pin(tokio_stream::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_schemas::{OrderType, Side};

    fn sample_request() -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            order_type: OrderType::Market,
            quantity_micros: 1_000_000,
            limit_price_micros: Some(50_000 * 1_000_000),
            reduce_only: false,
            position_direction: PositionDirection::OneWay,
        }
    }

    #[tokio::test]
    async fn place_order_fills_immediately_at_limit_price() {
        let adapter = PaperExchangeAdapter::new(ExchangeId::from("paper"));
        let placed = adapter.place_order(&sample_request(), "key-1").await.unwrap();
        assert_eq!(placed.status, OrderStatus::Filled);
        assert_eq!(placed.avg_fill_price_micros, Some(50_000 * 1_000_000));
    }

    #[tokio::test]
    async fn replaying_same_idempotency_key_returns_identical_order() {
        let adapter = PaperExchangeAdapter::new(ExchangeId::from("paper"));
        let first = adapter.place_order(&sample_request(), "key-1").await.unwrap();
        let second = adapter.place_order(&sample_request(), "key-1").await.unwrap();
        assert_eq!(first.exchange_order_id, second.exchange_order_id);
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_as_invalid_params() {
        let adapter = PaperExchangeAdapter::new(ExchangeId::from("paper"));
        let mut req = sample_request();
        req.quantity_micros = 0;
        let err = adapter.place_order(&req, "key-2").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn protection_call_requires_at_least_one_leg() {
        let adapter = PaperExchangeAdapter::new(ExchangeId::from("paper"));
        let err = adapter
            .set_position_protection("BTCUSDT", PositionDirection::OneWay, None, None, ProtectionMode::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidParams(_)));
    }
}
