//! Evaluation context handed to strategies.

use indicators::{IndicatorSet, IndicatorSnapshot};
use model::{AccountState, Bar, Interval, PositionState};

/// The indicator snapshots a strategy may inspect for one interval: the
/// value for the event's bar plus up to two committed predecessors for
/// cross/sequence checks.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorView {
    pub current: IndicatorSnapshot,
    pub prev: Option<IndicatorSnapshot>,
    pub prev2: Option<IndicatorSnapshot>,
}

impl IndicatorView {
    /// View for a commit event: the freshly committed snapshot plus history.
    pub fn committed(set: &IndicatorSet) -> Option<Self> {
        Some(Self {
            current: *set.current()?,
            prev: set.prev(1).copied(),
            prev2: set.prev(2).copied(),
        })
    }

    /// View for a preview event: the transient snapshot for the open bar,
    /// with the committed series as history.
    pub fn previewed(set: &IndicatorSet, bar: &Bar) -> Option<Self> {
        Some(Self {
            current: set.preview(bar)?,
            prev: set.current().copied(),
            prev2: set.prev(1).copied(),
        })
    }
}

/// The higher-timeframe state an execution-timeframe decision filters on:
/// the last committed snapshot of the trend interval and the close of the
/// bar that committed it.
#[derive(Debug, Clone, Copy)]
pub struct TrendView {
    pub ind: IndicatorSnapshot,
    pub close: f64,
}

/// Read-only context for one bar event.
///
/// Everything a strategy can see lives here; the account and position are the
/// strategy's own (never another instance's).
#[derive(Debug)]
pub struct EvalCtx<'a> {
    pub interval: Interval,
    pub bar: &'a Bar,
    /// Indicators for the event's interval. `None` until warm.
    pub ind: Option<IndicatorView>,
    /// Last committed indicators of the higher (trend) timeframe, plus the
    /// close that committed them. `None` until that timeframe is warm.
    pub trend: Option<TrendView>,
    pub position: Option<&'a PositionState>,
    pub cooldown_bars_remaining: u32,
    pub account: &'a AccountState,
    /// Lowest low over the recent closed execution-interval bars.
    pub swing_low: Option<f64>,
    /// Highest high over the recent closed execution-interval bars.
    pub swing_high: Option<f64>,
}

impl<'a> EvalCtx<'a> {
    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn price(&self) -> f64 {
        self.bar.close
    }
}
