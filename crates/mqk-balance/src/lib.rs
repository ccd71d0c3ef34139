//! §4.C BalanceLedger — cached per-(exchange, currency) balance snapshot plus
//! a reservation set with atomic check-and-insert semantics.
//!
//! Grounded on `mqk-portfolio`'s `Ledger` façade pattern: a typed, invariant-
//! checked write surface over otherwise-plain state, with read-only
//! snapshot views and no internal IO or locking — callers that share one
//! `BalanceLedger` across concurrent tasks wrap it in a mutex (see
//! `mqk-execution`'s reservation-then-submit sequence).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mqk_schemas::{ExchangeId, Micros, Reservation, ReservationState};

/// Cached balance triple for one (exchange, currency) pair, as last refreshed
/// by a reconciliation fetch. `reserved` is *not* stored here — it is always
/// derived from the live reservation set, never replaced by `update`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CachedBalance {
    pub total_micros: Micros,
    pub available_micros: Micros,
    pub locked_micros: Micros,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    /// `shortage_micros` is how much more would have been needed.
    InsufficientFunds { shortage_micros: Micros },
    UnknownReservation(Uuid),
    /// The reservation is not in the state the requested transition expects
    /// (e.g. committing an already-released reservation).
    WrongReservationState {
        reservation_id: Uuid,
        state: ReservationState,
    },
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientFunds { shortage_micros } => {
                write!(f, "insufficient funds: short by {shortage_micros} micros")
            }
            Self::UnknownReservation(id) => write!(f, "unknown reservation {id}"),
            Self::WrongReservationState {
                reservation_id,
                state,
            } => write!(
                f,
                "reservation {reservation_id} is {state:?}, not eligible for this transition"
            ),
        }
    }
}

impl std::error::Error for BalanceError {}

type Key = (ExchangeId, String);

/// In-memory balance cache + reservation set. Not `Clone` — callers hold one
/// instance behind a mutex; cloning it would fork the reservation set and
/// violate the single-source-of-truth invariant.
#[derive(Debug, Default)]
pub struct BalanceLedger {
    balances: HashMap<Key, CachedBalance>,
    /// Sum of HELD reservation amounts per key, maintained incrementally so
    /// `check`/`reserve` are O(1) rather than O(reservations).
    held_sum: HashMap<Key, Micros>,
    reservations: HashMap<Uuid, Reservation>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(exchange: &ExchangeId, currency: &str) -> Key {
        (exchange.clone(), currency.to_string())
    }

    /// Replace the cached snapshot from a reconciliation fetch. Reservations
    /// survive reconciliations unchanged — they represent local intent that
    /// the next reconciliation will eventually confirm, not state the
    /// exchange already knows about.
    pub fn update(
        &mut self,
        exchange: &ExchangeId,
        currency: &str,
        total_micros: Micros,
        available_micros: Micros,
        locked_micros: Micros,
    ) {
        self.balances.insert(
            Self::key(exchange, currency),
            CachedBalance {
                total_micros,
                available_micros,
                locked_micros,
            },
        );
    }

    pub fn cached(&self, exchange: &ExchangeId, currency: &str) -> CachedBalance {
        self.balances
            .get(&Self::key(exchange, currency))
            .copied()
            .unwrap_or_default()
    }

    pub fn held_reserved(&self, exchange: &ExchangeId, currency: &str) -> Micros {
        self.held_sum
            .get(&Self::key(exchange, currency))
            .copied()
            .unwrap_or(0)
    }

    /// Pure predicate: `amount <= available - sum(HELD reservations)`.
    pub fn check(
        &self,
        exchange: &ExchangeId,
        currency: &str,
        amount_micros: Micros,
    ) -> Result<(), BalanceError> {
        let available = self.cached(exchange, currency).available_micros;
        let held = self.held_reserved(exchange, currency);
        let headroom = available - held;
        if amount_micros <= headroom {
            Ok(())
        } else {
            Err(BalanceError::InsufficientFunds {
                shortage_micros: amount_micros - headroom,
            })
        }
    }

    /// Atomic check-and-insert: the headroom check and the reservation
    /// insert happen under the same `&mut self` borrow, so no other call can
    /// observe or mutate state in between.
    pub fn reserve(
        &mut self,
        exchange: &ExchangeId,
        currency: &str,
        amount_micros: Micros,
        purpose: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Uuid, BalanceError> {
        self.check(exchange, currency, amount_micros)?;

        let id = Uuid::new_v4();
        let key = Self::key(exchange, currency);
        self.reservations.insert(
            id,
            Reservation {
                id,
                exchange: exchange.clone(),
                currency: currency.to_string(),
                amount_micros,
                purpose: purpose.into(),
                created_at: now,
                state: ReservationState::Held,
            },
        );
        *self.held_sum.entry(key).or_insert(0) += amount_micros;
        Ok(id)
    }

    /// Marks COMMITTED and subtracts from cached `available` (the subsequent
    /// reconciliation confirms the venue agrees). Decreases `available`
    /// exactly once per reservation, regardless of how many times the
    /// originating order's fill events are replayed upstream.
    pub fn commit(&mut self, reservation_id: Uuid) -> Result<(), BalanceError> {
        let reservation = self
            .reservations
            .get_mut(&reservation_id)
            .ok_or(BalanceError::UnknownReservation(reservation_id))?;
        if reservation.state != ReservationState::Held {
            return Err(BalanceError::WrongReservationState {
                reservation_id,
                state: reservation.state,
            });
        }
        let key = (reservation.exchange.clone(), reservation.currency.clone());
        let amount = reservation.amount_micros;
        reservation.state = ReservationState::Committed;

        if let Some(held) = self.held_sum.get_mut(&key) {
            *held -= amount;
        }
        if let Some(bal) = self.balances.get_mut(&key) {
            bal.available_micros -= amount;
        }
        Ok(())
    }

    /// Marks RELEASED; no balance movement — releasing only frees the HELD
    /// headroom the reservation had been occupying.
    pub fn release(&mut self, reservation_id: Uuid) -> Result<(), BalanceError> {
        let reservation = self
            .reservations
            .get_mut(&reservation_id)
            .ok_or(BalanceError::UnknownReservation(reservation_id))?;
        if reservation.state != ReservationState::Held {
            return Err(BalanceError::WrongReservationState {
                reservation_id,
                state: reservation.state,
            });
        }
        let key = (reservation.exchange.clone(), reservation.currency.clone());
        let amount = reservation.amount_micros;
        reservation.state = ReservationState::Released;

        if let Some(held) = self.held_sum.get_mut(&key) {
            *held -= amount;
        }
        Ok(())
    }

    pub fn reservation(&self, reservation_id: Uuid) -> Option<&Reservation> {
        self.reservations.get(&reservation_id)
    }

    /// Testable property 1: for every (exchange, currency), the sum of HELD
    /// reservations never exceeds the cached available balance.
    pub fn invariant_holds(&self) -> bool {
        self.held_sum
            .iter()
            .all(|(key, held)| *held <= self.cached(&key.0, &key.1).available_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_schemas::MICROS_SCALE;

    fn ex() -> ExchangeId {
        ExchangeId::from("bybit")
    }

    #[test]
    fn reserve_then_release_returns_to_pre_reservation_state() {
        let mut ledger = BalanceLedger::new();
        ledger.update(&ex(), "USDT", 1000 * MICROS_SCALE, 1000 * MICROS_SCALE, 0);
        let before = ledger.cached(&ex(), "USDT");

        let id = ledger
            .reserve(&ex(), "USDT", 100 * MICROS_SCALE, "signal:abc", Utc::now())
            .unwrap();
        assert_eq!(ledger.held_reserved(&ex(), "USDT"), 100 * MICROS_SCALE);

        ledger.release(id).unwrap();
        assert_eq!(ledger.held_reserved(&ex(), "USDT"), 0);
        assert_eq!(ledger.cached(&ex(), "USDT"), before);
    }

    #[test]
    fn reserve_then_commit_decreases_available_exactly_once() {
        let mut ledger = BalanceLedger::new();
        ledger.update(&ex(), "USDT", 1000 * MICROS_SCALE, 1000 * MICROS_SCALE, 0);
        let id = ledger
            .reserve(&ex(), "USDT", 100 * MICROS_SCALE, "signal:abc", Utc::now())
            .unwrap();
        ledger.commit(id).unwrap();
        assert_eq!(
            ledger.cached(&ex(), "USDT").available_micros,
            900 * MICROS_SCALE
        );
        // Replaying commit on the same id must not double-subtract.
        assert!(ledger.commit(id).is_err());
        assert_eq!(
            ledger.cached(&ex(), "USDT").available_micros,
            900 * MICROS_SCALE
        );
    }

    #[test]
    fn reserve_rejects_when_amount_exceeds_headroom() {
        let mut ledger = BalanceLedger::new();
        ledger.update(&ex(), "USDT", 100 * MICROS_SCALE, 100 * MICROS_SCALE, 0);
        let err = ledger
            .reserve(&ex(), "USDT", 150 * MICROS_SCALE, "x", Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            BalanceError::InsufficientFunds {
                shortage_micros: 50 * MICROS_SCALE
            }
        );
    }

    #[test]
    fn concurrent_reservations_cannot_over_reserve_available_balance() {
        let mut ledger = BalanceLedger::new();
        ledger.update(&ex(), "USDT", 100 * MICROS_SCALE, 100 * MICROS_SCALE, 0);
        let _a = ledger
            .reserve(&ex(), "USDT", 60 * MICROS_SCALE, "a", Utc::now())
            .unwrap();
        // A second reservation that would push held past available is rejected.
        let err = ledger.reserve(&ex(), "USDT", 60 * MICROS_SCALE, "b", Utc::now());
        assert!(err.is_err());
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn reconciliation_update_does_not_disturb_live_reservations() {
        let mut ledger = BalanceLedger::new();
        ledger.update(&ex(), "USDT", 1000 * MICROS_SCALE, 1000 * MICROS_SCALE, 0);
        let id = ledger
            .reserve(&ex(), "USDT", 100 * MICROS_SCALE, "a", Utc::now())
            .unwrap();
        // A reconciliation fetch refreshes the snapshot mid-flight.
        ledger.update(&ex(), "USDT", 1000 * MICROS_SCALE, 950 * MICROS_SCALE, 50 * MICROS_SCALE);
        assert!(ledger.reservation(id).is_some());
        assert_eq!(ledger.held_reserved(&ex(), "USDT"), 100 * MICROS_SCALE);
    }
}
