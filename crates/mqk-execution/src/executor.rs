//! §4.G OrderExecutor — translates a risk-sized intent into a venue order
//! and, once filled, attaches protection.
//!
//! Mirrors a `BrokerGateway` chokepoint discipline (one object owning the
//! only path to a venue adapter) but generalized from a generic
//! `BrokerAdapter`/target-position model to a
//! reserve -> rate-limit -> submit -> protect sequence over
//! [`ExchangeAdapter`].

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use mqk_balance::{BalanceError, BalanceLedger};
use mqk_exchange_gateway::{
    ExchangeAdapter, ExchangeResult, GatewayError, OrderRequest, PlacedOrder, PositionDirection,
    ProtectionMode,
};
use mqk_ratelimiter::RateLimiter;
use mqk_risk::SizedIntent;
use mqk_schemas::{mul_div, EndpointClass, ExchangeId, Micros, Order, OrderType, Side, Signal,
    SignalFingerprint, MICROS_SCALE};

use crate::types::ExecutionError;

/// Result of a successful entry submission: the persisted [`Order`] row and
/// the reservation backing it, still `HELD` until the caller commits it.
#[derive(Clone, Debug)]
pub struct EntryFill {
    pub order: Order,
    pub reservation_id: Uuid,
}

/// `quantity x entry x margin_factor(leverage)`, per §4.G step 2.
/// `margin_factor(leverage) = 1 / leverage`.
pub fn reservation_amount_micros(qty_micros: Micros, entry_price_micros: Micros, leverage: u32) -> Micros {
    let notional = mul_div(qty_micros, entry_price_micros, MICROS_SCALE);
    notional / (leverage.max(1) as i64)
}

/// The stable idempotency key for one submission attempt. Same fingerprint
/// and attempt number always derive the same key, so a retried submit with
/// the same attempt count never double-creates a venue order.
pub fn idempotency_key(fingerprint: SignalFingerprint, attempt: u32) -> String {
    format!("{fingerprint}-{attempt}")
}

/// Owns the only path from sized intents to venue writes for one exchange.
/// Holds no state of its own beyond the adapter handle — balance and
/// rate-limiter state are passed in behind shared mutexes so the same
/// executor can be driven by concurrent signal-handling tasks.
pub struct OrderExecutor<A: ExchangeAdapter> {
    adapter: std::sync::Arc<A>,
}

impl<A: ExchangeAdapter> OrderExecutor<A> {
    pub fn new(adapter: std::sync::Arc<A>) -> Self {
        Self { adapter }
    }

    pub fn exchange(&self) -> &ExchangeId {
        self.adapter.exchange()
    }

    /// The underlying venue adapter, for callers that need direct access
    /// (e.g. `PositionMonitor`'s price/order-update subscriptions).
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// A cloned handle to the shared adapter, for callers that need to move
    /// it into a spawned task (e.g. the balance-reconciliation loop).
    pub fn adapter_handle(&self) -> std::sync::Arc<A> {
        self.adapter.clone()
    }

    /// §4.G steps 2-6: reserve balance, pass through the rate limiter,
    /// submit the entry order, and persist the resulting row. On a
    /// definitive venue rejection the reservation is released before this
    /// returns — callers never need to release it themselves on the error
    /// path.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_entry(
        &self,
        signal: &Signal,
        intent: &SizedIntent,
        currency: &str,
        hedge_mode: bool,
        balance: &Mutex<BalanceLedger>,
        rate_limiter: &Mutex<RateLimiter>,
        db_pool: Option<&PgPool>,
        fingerprint: SignalFingerprint,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<EntryFill, ExecutionError> {
        let exchange = self.adapter.exchange().clone();
        let entry_price = signal.suggested_entry_price_micros;
        let reservation_amount =
            reservation_amount_micros(intent.quantity_micros, entry_price, intent.leverage);

        let reservation_id = {
            let mut ledger = balance.lock().expect("balance ledger poisoned");
            ledger
                .reserve(
                    &exchange,
                    currency,
                    reservation_amount,
                    format!("signal:{fingerprint}"),
                    now,
                )
                .map_err(|e| match e {
                    BalanceError::InsufficientFunds { shortage_micros } => {
                        ExecutionError::InsufficientFunds { shortage_micros }
                    }
                    // `reserve` only ever fails via the headroom check above,
                    // which is always `InsufficientFunds`; the other
                    // variants belong to `commit`/`release`.
                    BalanceError::UnknownReservation(_) | BalanceError::WrongReservationState { .. } => {
                        unreachable!("reserve() cannot fail with {e}")
                    }
                })?
        };

        let delay = {
            let mut rl = rate_limiter.lock().expect("rate limiter poisoned");
            rl.acquire(&exchange, EndpointClass::Order, 2, now)
        };
        if delay > 0.0 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
        }

        let key = idempotency_key(fingerprint, attempt);
        let direction = PositionDirection::for_side(signal.side, hedge_mode);
        let request = OrderRequest {
            symbol: signal.symbol.clone(),
            side: signal.side,
            order_type: OrderType::Market,
            quantity_micros: intent.quantity_micros,
            limit_price_micros: None,
            reduce_only: false,
            position_direction: direction,
        };

        let placed = match self.adapter.place_order(&request, &key).await {
            Ok(placed) => placed,
            Err(err) => {
                let mut ledger = balance.lock().expect("balance ledger poisoned");
                let _ = ledger.release(reservation_id);
                return Err(ExecutionError::EntryRejected(err));
            }
        };

        let order = Order {
            id: Uuid::new_v4(),
            exchange: exchange.clone(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            order_type: OrderType::Market,
            requested_qty_micros: intent.quantity_micros,
            filled_qty_micros: placed.filled_qty_micros,
            avg_fill_price_micros: placed.avg_fill_price_micros,
            status: placed.status,
            position_id: None,
            reservation_id: Some(reservation_id),
            created_at: now,
            updated_at: now,
            exchange_order_id: Some(placed.exchange_order_id),
            idempotency_key: key,
        };

        if let Some(pool) = db_pool {
            if let Err(e) = mqk_db::order_insert(pool, &order).await {
                tracing::error!(error = %e, order_id = %order.id, "order_insert failed after successful fill");
            }
        }

        Ok(EntryFill {
            order,
            reservation_id,
        })
    }

    /// Reduce-only market order for an SLTPEngine-driven partial or
    /// defensive close. No reservation is taken — closing exposure frees
    /// margin rather than consuming it. `idempotency_key` must be stable
    /// across retries of the same logical close (e.g. derived from
    /// `position_id` + ladder index).
    pub async fn submit_reduce_only(
        &self,
        symbol: &str,
        side: Side,
        hedge_mode: bool,
        qty_micros: Micros,
        idempotency_key: &str,
        rate_limiter: &Mutex<RateLimiter>,
        now: DateTime<Utc>,
    ) -> ExchangeResult<PlacedOrder> {
        let exchange = self.adapter.exchange().clone();
        let delay = {
            let mut rl = rate_limiter.lock().expect("rate limiter poisoned");
            rl.acquire(&exchange, EndpointClass::Order, 2, now)
        };
        if delay > 0.0 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
        }

        let direction = PositionDirection::for_side(side, hedge_mode);
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity_micros: qty_micros,
            limit_price_micros: None,
            reduce_only: true,
            position_direction: direction,
        };
        self.adapter.place_order(&request, idempotency_key).await
    }

    /// §4.G step 8: move a HELD reservation to COMMITTED. Called once the
    /// entry order has reached `FILLED` (or an acceptable partial).
    pub fn commit_reservation(
        &self,
        balance: &Mutex<BalanceLedger>,
        reservation_id: Uuid,
    ) -> Result<(), BalanceError> {
        balance
            .lock()
            .expect("balance ledger poisoned")
            .commit(reservation_id)
    }

    /// §4.G step 7 / §7 `PositionModeMismatch`: install SL/TP on the
    /// appropriate hedge/one-way slot. A mismatch re-derives the slot once
    /// (flips the configured mode) and retries exactly once before
    /// surfacing the error — never retried a second time, per §7's policy.
    pub async fn install_protection(
        &self,
        symbol: &str,
        side: Side,
        hedge_mode: bool,
        stop_loss_micros: Option<Micros>,
        take_profit_micros: Option<Micros>,
        mode: ProtectionMode,
        rate_limiter: &Mutex<RateLimiter>,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let exchange = self.adapter.exchange().clone();
        let delay = {
            let mut rl = rate_limiter.lock().expect("rate limiter poisoned");
            rl.acquire(&exchange, EndpointClass::Position, 1, now)
        };
        if delay > 0.0 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
        }

        let direction = PositionDirection::for_side(side, hedge_mode);
        match self
            .adapter
            .set_position_protection(symbol, direction, stop_loss_micros, take_profit_micros, mode)
            .await
        {
            Ok(()) => Ok(()),
            Err(GatewayError::PositionModeMismatch) => {
                let retry_direction = PositionDirection::for_side(side, !hedge_mode);
                self.adapter
                    .set_position_protection(
                        symbol,
                        retry_direction,
                        stop_loss_micros,
                        take_profit_micros,
                        mode,
                    )
                    .await
            }
            Err(e) => Err(e),
        }
    }
}
