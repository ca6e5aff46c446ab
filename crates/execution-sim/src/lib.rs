//! Simulated matching engine.
//!
//! Settles strategy intents against a virtual account: fills at the decision
//! price, charges fees, maintains stop/TP lines and the liquidation price,
//! and emits the trade/ledger/equity records every mutation produces.

mod account;
mod broker;
mod error;
mod ids;
mod triggers;

pub use account::SimAccount;
pub use broker::{FillReport, MmrTier, RiskParams, SimBroker, SimParams};
pub use error::SimError;
pub use ids::IdGen;
pub use triggers::resolve_preview_exit;
