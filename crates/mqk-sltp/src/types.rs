//! §4.H SLTPEngine outputs.

use mqk_schemas::Micros;

/// A protection modification for `PositionMonitor` to dispatch through
/// `OrderExecutor`. At most one is produced per [`crate::engine::tick`] call.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtectionAction {
    /// Reduce-only market close of one partial-TP ladder rung.
    PartialClose {
        ladder_index: usize,
        close_qty_micros: Micros,
    },
    /// Move the resting stop-loss to a strictly more protective level.
    MoveStopLoss { new_sl_micros: Micros },
    /// Defensive full close, issued by the caller (not `tick` itself) when a
    /// `MoveStopLoss` is rejected by the venue as `InvalidParams`.
    ClosePosition,
}

/// The result of one `tick`: a provisional next-state for the position (only
/// meaningful if `action` is later confirmed to have succeeded on the venue)
/// and the action to dispatch, if any.
///
/// Callers must persist `position` only after the corresponding venue call
/// (if `action` is `Some`) has been confirmed. On failure, retry `tick`
/// against the original, unmutated position — it will reproduce the same
/// action deterministically.
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutcome {
    pub position: mqk_schemas::Position,
    pub action: Option<ProtectionAction>,
}
