//! §4.G error taxonomy and the values `OrderExecutor` hands back to callers.

use mqk_exchange_gateway::GatewayError;
use mqk_schemas::Micros;

/// Failure modes specific to the reserve -> rate-limit -> submit sequence.
/// Gateway-level rejections (`InvalidParams`, `Throttled`, ...) pass through
/// as [`ExecutionError::EntryRejected`] unchanged — §7's per-kind recovery
/// policy is the caller's concern, not this crate's.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionError {
    /// Reservation failed before any venue call was made; no order was
    /// submitted. `shortage_micros` is how much more would have been needed.
    InsufficientFunds { shortage_micros: Micros },
    /// The venue rejected the entry order after a reservation was held; the
    /// reservation has already been released by the time this is returned.
    EntryRejected(GatewayError),
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionError::InsufficientFunds { shortage_micros } => {
                write!(f, "insufficient funds: short by {shortage_micros} micros")
            }
            ExecutionError::EntryRejected(e) => write!(f, "entry order rejected: {e}"),
        }
    }
}

impl std::error::Error for ExecutionError {}
