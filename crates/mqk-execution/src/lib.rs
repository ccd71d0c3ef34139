//! mqk-execution — §4.G OrderExecutor.
//!
//! The only path from a risk-sized intent to a venue write: reserve
//! balance, pass the exchange rate limiter, submit through an
//! [`mqk_exchange_gateway::ExchangeAdapter`], persist the resulting order,
//! and attach protection. [`oms`] tracks the idempotent order lifecycle
//! once a venue order exists; it is domain-agnostic and used unchanged by
//! `mqk-position-monitor`.

pub mod executor;
pub mod oms;
mod types;

pub use executor::{idempotency_key, reservation_amount_micros, EntryFill, OrderExecutor};
pub use types::ExecutionError;
