//! Core strategy types and traits.
//!
//! A strategy is a passive state machine: the engine feeds it bar commits and
//! previews together with an immutable view of its own account, and the
//! strategy answers with at most one intent per event. Strategies never touch
//! storage, networking, or each other.

mod context;
mod error;
mod intent;
mod strategy;

pub use context::{EvalCtx, IndicatorView, TrendView};
pub use error::StrategyError;
pub use intent::{ConditionChecklist, ConditionRow, EntrySignal, ExitAction, StrategyIntent};
pub use strategy::{BoxedStrategy, Strategy};
