//! Incremental technical indicators with a strict preview/commit split.
//!
//! Each indicator seeds from a simple average of its first N inputs and then
//! advances one step per closed bar. `commit` mutates state; `preview`
//! computes the value the indicator would take if the open bar closed at its
//! current price, without touching committed state. The committed series is
//! reproducible: replaying the same closed bars through a fresh engine yields
//! identical values.

mod atr;
mod ema;
mod hints;
mod macd;
mod rsi;
mod set;
mod snapshot;

pub use atr::Atr;
pub use ema::Ema;
pub use hints::{chart_hints, ChartKind, ChartPanel, FieldHint};
pub use macd::{Macd, MacdOutput};
pub use rsi::Rsi;
pub use set::{IndicatorConfig, IndicatorSet};
pub use snapshot::IndicatorSnapshot;
