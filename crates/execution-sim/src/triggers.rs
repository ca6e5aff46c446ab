//! Intra-bar trigger resolution for preview events.

use model::{Bar, CloseReason, PositionSide, PositionState};
use strategy_core::ExitAction;

/// Decide which protective level, if any, the in-progress bar has reached.
///
/// Checked in order: liquidation, then stop/take-profit. When both a stop and
/// a take-profit lie within the bar's `[low, high]`, the bar's direction
/// decides which path the price is assumed to have walked first: an up bar
/// (`close > open`) reaches the take-profit first, a down bar the stop. This
/// is a deliberately coarse approximation of tick order.
pub fn resolve_preview_exit(pos: &PositionState, bar: &Bar) -> Option<ExitAction> {
    let liq_hit = match pos.side {
        PositionSide::Long => bar.low <= pos.liq_price,
        PositionSide::Short => bar.high >= pos.liq_price,
    };
    if liq_hit {
        return Some(ExitAction::new(CloseReason::Liq, pos.liq_price));
    }

    let (stop_hit, tp1_hit, tp2_hit) = match pos.side {
        PositionSide::Long => (
            bar.low <= pos.stop_price,
            !pos.tp1_hit && bar.high >= pos.tp1_price,
            bar.high >= pos.tp2_price,
        ),
        PositionSide::Short => (
            bar.high >= pos.stop_price,
            !pos.tp1_hit && bar.low <= pos.tp1_price,
            bar.low <= pos.tp2_price,
        ),
    };

    let tp_action = if tp1_hit {
        Some(ExitAction::new(CloseReason::Tp1, pos.tp1_price))
    } else if tp2_hit {
        Some(ExitAction::new(CloseReason::Tp2, pos.tp2_price))
    } else {
        None
    };
    let stop_action = stop_hit.then(|| ExitAction::new(CloseReason::Stop, pos.stop_price));

    match (stop_action, tp_action) {
        (Some(stop), Some(tp)) => {
            if bar.close > bar.open {
                Some(tp)
            } else {
                Some(stop)
            }
        }
        (Some(stop), None) => Some(stop),
        (None, Some(tp)) => Some(tp),
        (None, None) => None,
    }
}
