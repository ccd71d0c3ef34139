//! §4.H SLTPEngine: the per-tick protection-evolution state machine.
//!
//! Pure and deterministic — no venue calls, no clock reads beyond the `now`
//! the caller supplies. `PositionMonitor` is the production caller; tests
//! drive it directly against fixture positions.

use chrono::{DateTime, Utc};
use mqk_schemas::{mul_div, Micros, Position, ProtectionPlan, Side, MICROS_SCALE};

use crate::types::{ProtectionAction, TickOutcome};

/// Absolute price that is `pct_micros` favourable-percent away from `entry`
/// for the given side. Inverse of [`Position::favourable_pct_micros`].
fn price_at_favourable_pct(entry_micros: Micros, side: Side, pct_micros: i64) -> Micros {
    let delta = mul_div(entry_micros, pct_micros, MICROS_SCALE);
    entry_micros + delta * side.sign()
}

/// `true` if `candidate` sits strictly closer to lock-in than `current` for
/// this side. LONG: higher is more protective. SHORT: lower is more
/// protective. No current SL is treated as "no protection" — anything beats
/// it.
fn more_protective(side: Side, candidate_micros: Micros, current_micros: Option<Micros>) -> bool {
    match current_micros {
        None => true,
        Some(current) => match side {
            Side::Long => candidate_micros > current,
            Side::Short => candidate_micros < current,
        },
    }
}

/// §4.H, steps 1-4, evaluated in order with at most one modification
/// produced. `position` is not mutated; the returned [`TickOutcome`] carries
/// a provisional next state the caller applies once the dispatched action
/// (if any) is confirmed.
pub fn tick(position: &Position, mark_price_micros: Micros, plan: &ProtectionPlan, now: DateTime<Utc>) -> TickOutcome {
    let favourable = position.favourable_pct_micros(mark_price_micros);
    let highest = favourable.max(position.highest_favourable_pct_micros);

    let mut next = position.clone();
    next.highest_favourable_pct_micros = highest;
    next.updated_at = now;

    // 1. Partial take-profit ladder — exempt from the protection-update cap.
    if let Some((index, rung)) = plan
        .partial_tp_ladder
        .iter()
        .enumerate()
        .find(|(i, rung)| {
            position.partial_tp_bitmask & (1 << i) == 0 && favourable >= rung.trigger_profit_pct_micros
        })
    {
        let close_qty = mul_div(rung.close_fraction_micros, position.initial_qty_micros, MICROS_SCALE)
            .min(next.current_qty_micros);
        next.partial_tp_bitmask |= 1 << index;
        next.current_qty_micros -= close_qty;
        next.protection_update_count += 1;
        return TickOutcome {
            position: next,
            action: Some(ProtectionAction::PartialClose {
                ladder_index: index,
                close_qty_micros: close_qty,
            }),
        };
    }

    let cap_reached = position.protection_update_count >= plan.max_protection_updates;
    if cap_reached {
        return TickOutcome {
            position: next,
            action: None,
        };
    }

    // 2. Trailing stop.
    if let Some(trailing) = &plan.trailing {
        if highest >= trailing.activation_profit_pct_micros {
            let candidate_pct = highest - trailing.trailing_distance_pct_micros;
            let candidate_sl = price_at_favourable_pct(position.entry_price_micros, position.side, candidate_pct);
            if more_protective(position.side, candidate_sl, position.active_sl_micros) {
                next.active_sl_micros = Some(candidate_sl);
                next.trailing_armed = true;
                next.protection_update_count += 1;
                return TickOutcome {
                    position: next,
                    action: Some(ProtectionAction::MoveStopLoss {
                        new_sl_micros: candidate_sl,
                    }),
                };
            }
        }
    }

    // 3. Profit lock ladder — highest rung whose trigger has been reached.
    if let Some(rung) = plan
        .profit_lock_ladder
        .iter()
        .rev()
        .find(|r| highest >= r.trigger_profit_pct_micros)
    {
        let candidate_sl = price_at_favourable_pct(position.entry_price_micros, position.side, rung.locked_profit_pct_micros);
        if more_protective(position.side, candidate_sl, position.active_sl_micros) {
            next.active_sl_micros = Some(candidate_sl);
            next.protection_update_count += 1;
            return TickOutcome {
                position: next,
                action: Some(ProtectionAction::MoveStopLoss {
                    new_sl_micros: candidate_sl,
                }),
            };
        }
    }

    // 4. Breakeven — fires once, never undone. Steps 2-3 return as soon as
    // they act, so a later flat-price tick can reach this branch with SL
    // already moved past breakeven by trailing/profit-lock; only move SL
    // here if entry±offset is still strictly more protective than wherever
    // it already sits, so breakeven can never pull protection backward. The
    // arm always latches on first activation regardless, so it is never
    // re-attempted once the profit threshold is crossed.
    if let Some(breakeven) = &plan.breakeven {
        if !position.breakeven_armed && highest >= breakeven.activation_profit_pct_micros {
            let candidate_sl = price_at_favourable_pct(position.entry_price_micros, position.side, breakeven.offset_pct_micros);
            next.breakeven_armed = true;
            if more_protective(position.side, candidate_sl, position.active_sl_micros) {
                next.active_sl_micros = Some(candidate_sl);
                next.protection_update_count += 1;
                return TickOutcome {
                    position: next,
                    action: Some(ProtectionAction::MoveStopLoss {
                        new_sl_micros: candidate_sl,
                    }),
                };
            }
        }
    }

    TickOutcome {
        position: next,
        action: None,
    }
}

/// Issued by the caller (not `tick`) when a `MoveStopLoss` is rejected by
/// the venue as `InvalidParams` — the defensive fallback from §4.H's
/// failure semantics.
pub fn defensive_close_action() -> ProtectionAction {
    ProtectionAction::ClosePosition
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mqk_schemas::{BreakevenConfig, ExchangeId, PartialTpRung, ProfitLockRung, TrailingConfig};
    use uuid::Uuid;

    fn base_position(entry: Micros, qty: Micros) -> Position {
        Position {
            id: Uuid::new_v4(),
            exchange: ExchangeId::from("bybit"),
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_price_micros: entry,
            current_qty_micros: qty,
            initial_qty_micros: qty,
            leverage: 1,
            active_sl_micros: Some(entry - entry * 3 / 100),
            active_tp_micros: Some(entry + entry * 5 / 100),
            highest_favourable_pct_micros: 0,
            partial_tp_bitmask: 0,
            breakeven_armed: false,
            trailing_armed: false,
            protection_update_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn plan() -> ProtectionPlan {
        ProtectionPlan {
            initial_stop_distance_pct_micros: 3 * MICROS_SCALE / 100,
            initial_take_distance_pct_micros: 5 * MICROS_SCALE / 100,
            trailing: Some(TrailingConfig {
                activation_profit_pct_micros: MICROS_SCALE / 100, // +1%
                trailing_distance_pct_micros: MICROS_SCALE / 200, // 0.5%
            }),
            breakeven: Some(BreakevenConfig {
                activation_profit_pct_micros: MICROS_SCALE / 200, // +0.5%
                offset_pct_micros: 0,
            }),
            profit_lock_ladder: vec![ProfitLockRung {
                trigger_profit_pct_micros: 3 * MICROS_SCALE / 100,
                locked_profit_pct_micros: MICROS_SCALE / 100,
            }],
            partial_tp_ladder: vec![
                PartialTpRung {
                    trigger_profit_pct_micros: 2 * MICROS_SCALE / 100,
                    close_fraction_micros: 3 * MICROS_SCALE / 10,
                },
                PartialTpRung {
                    trigger_profit_pct_micros: 3 * MICROS_SCALE / 100,
                    close_fraction_micros: 3 * MICROS_SCALE / 10,
                },
                PartialTpRung {
                    trigger_profit_pct_micros: 4 * MICROS_SCALE / 100,
                    close_fraction_micros: 4 * MICROS_SCALE / 10,
                },
            ],
            max_protection_updates: 5,
        }
    }

    #[test]
    fn partial_tp_fires_at_trigger_and_is_idempotent_on_replay() {
        let entry = 50_000 * MICROS_SCALE;
        let position = base_position(entry, MICROS_SCALE); // qty = 1.0
        let mark = 51_000 * MICROS_SCALE; // +2%
        let plan = plan();

        let outcome = tick(&position, mark, &plan, Utc::now());
        match outcome.action {
            Some(ProtectionAction::PartialClose { ladder_index, close_qty_micros }) => {
                assert_eq!(ladder_index, 0);
                assert_eq!(close_qty_micros, 3 * MICROS_SCALE / 10);
            }
            other => panic!("expected partial close, got {other:?}"),
        }
        assert_eq!(outcome.position.partial_tp_bitmask & 1, 1);

        // Replaying against the *updated* position at the same mark produces no action.
        let replay = tick(&outcome.position, mark, &plan, Utc::now());
        assert_eq!(replay.action, None);
    }

    #[test]
    fn favourable_pct_strictly_below_trigger_does_not_admit() {
        let entry = 50_000 * MICROS_SCALE;
        let position = base_position(entry, MICROS_SCALE);
        // +0.4%, below breakeven's +0.5% activation and every other threshold.
        let mark = entry + entry * 4 / 1000;
        let outcome = tick(&position, mark, &plan(), Utc::now());
        assert_eq!(outcome.action, None);
    }

    #[test]
    fn breakeven_arms_once_and_is_never_undone() {
        let entry = 50_000 * MICROS_SCALE;
        let position = base_position(entry, MICROS_SCALE);
        // Isolate breakeven: no trailing, no profit lock, no ladder to compete with it.
        let breakeven_only_plan = ProtectionPlan {
            trailing: None,
            profit_lock_ladder: vec![],
            partial_tp_ladder: vec![],
            ..plan()
        };
        let mark = entry + entry / 100; // +1%, clears the +0.5% breakeven activation

        let outcome = tick(&position, mark, &breakeven_only_plan, Utc::now());
        match outcome.action {
            Some(ProtectionAction::MoveStopLoss { .. }) => {}
            other => panic!("expected breakeven move, got {other:?}"),
        }
        assert!(outcome.position.breakeven_armed);

        let replay = tick(&outcome.position, mark, &breakeven_only_plan, Utc::now());
        assert_eq!(replay.action, None, "breakeven must not re-fire once armed");
    }

    #[test]
    fn breakeven_never_pulls_sl_back_once_trailing_has_moved_it_further() {
        let entry = 50_000 * MICROS_SCALE;
        let position = base_position(entry, MICROS_SCALE);
        let plan = ProtectionPlan {
            profit_lock_ladder: vec![],
            partial_tp_ladder: vec![],
            ..plan()
        };

        // First tick at +1%: trailing activates (distance 0.5%) and moves SL
        // to +0.5%, returning before breakeven is ever evaluated.
        let mark_up = entry + entry / 100;
        let trailed = tick(&position, mark_up, &plan, Utc::now());
        let trailed_sl = match trailed.action {
            Some(ProtectionAction::MoveStopLoss { new_sl_micros }) => new_sl_micros,
            other => panic!("expected trailing move, got {other:?}"),
        };
        assert!(!trailed.position.breakeven_armed);

        // A later flat tick (still +1%, highest unchanged) reaches breakeven
        // since trailing's candidate no longer improves on itself. Breakeven
        // targets entry+0 here, which is less protective than the trailed
        // SL — it must not move SL backward, only latch the arm.
        let flat = tick(&trailed.position, mark_up, &plan, Utc::now());
        assert_eq!(flat.action, None, "breakeven must not override a more protective trailing SL");
        assert!(flat.position.breakeven_armed, "breakeven still latches even when it declines to move SL");
        assert_eq!(flat.position.active_sl_micros, Some(trailed_sl));
    }

    #[test]
    fn protection_update_count_is_monotonic_and_caps_trailing() {
        let entry = 50_000 * MICROS_SCALE;
        let mut position = base_position(entry, MICROS_SCALE);
        position.partial_tp_bitmask = 0b111; // ladder exhausted
        position.protection_update_count = 5; // at cap
        let mark = entry + entry * 10 / 100;
        let outcome = tick(&position, mark, &plan(), Utc::now());
        assert_eq!(outcome.action, None);
        assert_eq!(outcome.position.protection_update_count, 5);
    }
}
