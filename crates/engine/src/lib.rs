//! Runtime orchestration.
//!
//! The engine owns the kline buffers and every strategy instance (strategy
//! state machine + virtual account + indicator sets). It consumes the bar
//! event stream and drives each event through the fixed pipeline: buffer →
//! indicators → strategy → matcher → DAO → fan-out. Strategies never see each
//! other's state; a strategy that violates an invariant is quarantined while
//! the rest keep trading.

mod command;
mod error;
mod funding;
mod instance;
mod runtime;
pub mod strategies;
mod warmup;

pub use command::EngineCommand;
pub use error::EngineError;
pub use funding::run_funding_task;
pub use instance::{StrategyInstance, StrategySpec};
pub use runtime::{Engine, EngineConfig};
pub use warmup::{warmup_all, WarmupReport};
