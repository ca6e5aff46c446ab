//! Bounded per-interval bar rings.
//!
//! Each interval keeps an ordered ring of bars keyed by `open_time`. Only the
//! tail bar may be open; everything behind it is committed history.

mod buffer;
mod warmup;

pub use buffer::{Applied, BufferError, KlineBuffer, KlineBufferManager};
pub use warmup::{compute_min_bars, compute_warmup_bars, IndicatorLengths};
