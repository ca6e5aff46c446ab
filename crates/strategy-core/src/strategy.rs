//! Strategy trait definition.

use model::PositionState;

use crate::context::EvalCtx;
use crate::intent::{ConditionChecklist, ExitAction, StrategyIntent};

/// Core trait for trading strategies.
///
/// # Lifecycle
///
/// 1. `on_restore` - on startup, when an open position was recovered from
///    storage
/// 2. `on_bar_commit` - once per closed bar, shorter intervals first when
///    several close together; the only place a position may be opened
/// 3. `on_bar_preview` - on every live revision of the open bar; may close
///    (stop / take-profit / liquidation) but MUST NOT open
/// 4. `describe_conditions` - read-only checklist of the entry clauses, for
///    the UI
///
/// The engine owns the account and position and passes them in through the
/// context; a strategy only decides.
pub trait Strategy: Send + Sync {
    /// Unique instance id, e.g. "default" or "aggressive".
    fn id(&self) -> &str;

    /// Type tag, e.g. "trend_pullback".
    fn kind(&self) -> &'static str;

    /// Called for every closed bar of every subscribed interval.
    fn on_bar_commit(&mut self, ctx: &EvalCtx<'_>) -> Option<StrategyIntent>;

    /// Called for every live revision of the open bar.
    ///
    /// Position management only: the returned action can reduce or close,
    /// never open.
    fn on_bar_preview(&mut self, ctx: &EvalCtx<'_>) -> Option<ExitAction>;

    /// Current truth of each entry clause, for display.
    fn describe_conditions(&self, ctx: &EvalCtx<'_>) -> ConditionChecklist;

    /// Called once on startup when an open position was restored.
    fn on_restore(&mut self, _position: &PositionState) {}
}

/// A boxed strategy trait object.
pub type BoxedStrategy = Box<dyn Strategy>;
