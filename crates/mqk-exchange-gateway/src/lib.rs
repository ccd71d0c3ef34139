//! mqk-exchange-gateway — §4.A ExchangeGateway.
//!
//! A uniform request/response/auth/WebSocket facade over each supported
//! venue: the [`ExchangeAdapter`] trait, HMAC-SHA256 request signing, a
//! deterministic [`paper::PaperExchangeAdapter`] for tests and dry runs, and
//! [`http::BybitStyleAdapter`] as the production HTTP+WS implementation
//! pattern other venues follow.

pub mod adapter;
pub mod http;
pub mod paper;
pub mod signing;
pub mod types;

pub use adapter::{ExchangeAdapter, OrderUpdateStream, PriceStream};
pub use http::BybitStyleAdapter;
pub use paper::PaperExchangeAdapter;
pub use types::{
    BalanceEntry, ExchangeResult, GatewayError, OrderRequest, OrderStatusDelta, PlacedOrder,
    PositionDirection, PositionView, PriceTick, ProtectionMode,
};
