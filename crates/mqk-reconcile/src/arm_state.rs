//! Arm state with fail-closed boot semantics.
//!
//! # Invariants
//!
//! - **Boot is always fail-closed**: the system starts DISARMED on every
//!   restart, regardless of what the last persisted state was. A previously
//!   armed state is NOT trusted; explicit re-arm is required every session.
//!
//! - **Disarm reason is preserved across restart**: when a reconcile drift
//!   triggered the disarm, that reason survives in the persisted record so
//!   operators can identify the cause before re-arming.
//!
//! - **Explicit arm is the only escape**: `ArmState::arm()` is the sole path
//!   to `Armed`. Callers MUST have passed [`crate::check_arm_gate`] before
//!   calling it — that enforcement lives at the caller's single choke-point,
//!   not here.
//!
//! All logic is pure deterministic — no IO, no clock, no randomness.

use crate::gate::DriftAction;

/// The reason the system is disarmed.
///
/// Preserved in persistence so operators know why a re-arm is required.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisarmReason {
    /// System booted without a previously armed state — fail-closed default.
    BootDefault,
    /// Operator explicitly disarmed the system.
    ManualDisarm,
    /// Reconcile drift detected between local and broker state.
    ReconcileDrift,
}

/// The system's top-level arm state.
///
/// Tracked in memory and persisted so `ArmState::boot` can determine the
/// starting state on every restart (always DISARMED — see invariants above).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArmState {
    /// System is armed — execution is permitted (subject to other gates).
    Armed,
    /// System is disarmed — execution is blocked regardless of other conditions.
    Disarmed { reason: DisarmReason },
}

impl ArmState {
    /// Fail-closed boot semantics.
    ///
    /// | Persisted state              | Boot result                        |
    /// |------------------------------|------------------------------------|
    /// | `None` (no record)           | `Disarmed { BootDefault }`         |
    /// | `Some(Armed)`                | `Disarmed { BootDefault }`         |
    /// | `Some(Disarmed { reason })`  | `Disarmed { reason }` (preserved)  |
    ///
    /// The system NEVER auto-arms from a persisted `Armed` state. Re-arm
    /// always requires explicit operator action after each restart.
    pub fn boot(persisted: Option<ArmState>) -> Self {
        match persisted {
            None => ArmState::Disarmed {
                reason: DisarmReason::BootDefault,
            },
            Some(ArmState::Armed) => ArmState::Disarmed {
                reason: DisarmReason::BootDefault,
            },
            Some(d @ ArmState::Disarmed { .. }) => d,
        }
    }

    /// Explicit operator arm.
    ///
    /// Callers MUST have passed [`crate::check_arm_gate`] before calling
    /// this. This function does not re-verify the gate; that is the
    /// caller's responsibility, enforced at its own single choke-point.
    pub fn arm() -> Self {
        ArmState::Armed
    }

    /// Manual operator disarm.
    pub fn manual_disarm() -> Self {
        ArmState::Disarmed {
            reason: DisarmReason::ManualDisarm,
        }
    }

    /// Derive an `ArmState` transition from a periodic [`DriftAction`].
    ///
    /// Returns `Some(Disarmed { ReconcileDrift })` for
    /// [`DriftAction::HaltAndDisarm`]; `None` for `Continue` (no transition —
    /// the caller keeps whatever arm state it already had).
    pub fn from_drift_action(action: &DriftAction) -> Option<Self> {
        match action {
            DriftAction::HaltAndDisarm { .. } => Some(ArmState::Disarmed {
                reason: DisarmReason::ReconcileDrift,
            }),
            DriftAction::Continue => None,
        }
    }

    /// `true` if execution is permitted.
    pub fn is_armed(&self) -> bool {
        matches!(self, ArmState::Armed)
    }

    /// `true` if execution is blocked.
    pub fn is_disarmed(&self) -> bool {
        !self.is_armed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReconcileReport;

    #[test]
    fn boot_with_no_record_is_disarmed_boot_default() {
        assert_eq!(
            ArmState::boot(None),
            ArmState::Disarmed {
                reason: DisarmReason::BootDefault
            }
        );
    }

    #[test]
    fn boot_never_trusts_a_persisted_armed_state() {
        assert_eq!(
            ArmState::boot(Some(ArmState::Armed)),
            ArmState::Disarmed {
                reason: DisarmReason::BootDefault
            }
        );
    }

    #[test]
    fn boot_preserves_a_persisted_disarm_reason() {
        let persisted = ArmState::Disarmed {
            reason: DisarmReason::ManualDisarm,
        };
        assert_eq!(ArmState::boot(Some(persisted.clone())), persisted);
    }

    #[test]
    fn drift_continue_yields_no_transition() {
        assert_eq!(ArmState::from_drift_action(&DriftAction::Continue), None);
    }

    #[test]
    fn drift_halt_disarms_with_reconcile_drift_reason() {
        let action = DriftAction::HaltAndDisarm {
            report: ReconcileReport::clean(),
        };
        assert_eq!(
            ArmState::from_drift_action(&action),
            Some(ArmState::Disarmed {
                reason: DisarmReason::ReconcileDrift
            })
        );
    }
}
