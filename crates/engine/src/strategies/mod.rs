//! Shipped strategy implementations.

mod ma_cross;
mod trend_pullback;

pub use ma_cross::MaCrossStrategy;
pub use trend_pullback::TrendPullbackStrategy;

use model::Interval;
use serde::{Deserialize, Serialize};
use strategy_core::{BoxedStrategy, StrategyError};

/// Tuning knobs shared by the shipped strategies. Per-instance overrides come
/// from the strategy entries in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyTuning {
    pub trend_strength_min: f64,
    pub atr_stop_mult: f64,
    pub cooldown_after_stop: u32,
    pub rsi_long_lower: f64,
    pub rsi_long_upper: f64,
    pub rsi_short_upper: f64,
    pub rsi_short_lower: f64,
    pub rsi_slope_required: bool,
    /// Closed execution bars scanned for the structural stop.
    pub swing_lookback: usize,
}

impl Default for StrategyTuning {
    fn default() -> Self {
        Self {
            trend_strength_min: 0.003,
            atr_stop_mult: 1.5,
            cooldown_after_stop: 4,
            rsi_long_lower: 50.0,
            rsi_long_upper: 60.0,
            rsi_short_upper: 50.0,
            rsi_short_lower: 40.0,
            rsi_slope_required: true,
            swing_lookback: 10,
        }
    }
}

/// Build a strategy instance by type tag.
pub fn create_strategy(
    kind: &str,
    id: &str,
    tuning: StrategyTuning,
    exec_interval: Interval,
    trend_interval: Interval,
) -> Result<BoxedStrategy, StrategyError> {
    match kind {
        "trend_pullback" => Ok(Box::new(TrendPullbackStrategy::new(
            id,
            tuning,
            exec_interval,
            trend_interval,
        ))),
        "ma_cross" => Ok(Box::new(MaCrossStrategy::new(
            id,
            tuning,
            exec_interval,
        ))),
        other => Err(StrategyError::UnknownType(other.to_string())),
    }
}
