//! Fan-out state stores.
//!
//! The engine publishes into these after every pipeline stage completes;
//! subscriber sessions read coalesced frames out of them. The status store is
//! latest-wins per strategy; the stream store keeps a bounded event ring that
//! drops its oldest entries under pressure.

mod status;
mod stream;

pub use status::{PositionBrief, StatusStore, StrategyStatus};
pub use stream::{StreamEvent, StreamStore};
