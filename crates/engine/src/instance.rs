use std::collections::HashMap;

use execution_sim::SimAccount;
use indicators::{IndicatorConfig, IndicatorSet};
use model::Interval;
use strategy_core::BoxedStrategy;

/// Everything needed to build one strategy instance.
pub struct StrategySpec {
    pub strategy: BoxedStrategy,
    pub indicator_config: IndicatorConfig,
    pub initial_capital: f64,
    /// Execution-interval bars to wait after a stop-out.
    pub cooldown_after_stop: u32,
    /// Closed execution bars scanned for the structural stop.
    pub swing_lookback: usize,
}

/// One strategy plus everything it exclusively owns: its virtual account and
/// its per-interval indicator sets. No other instance can reach any of this.
pub struct StrategyInstance {
    pub strategy: BoxedStrategy,
    pub account: SimAccount,
    pub indicators: HashMap<Interval, IndicatorSet>,
    pub cooldown_bars: u32,
    pub cooldown_after_stop: u32,
    pub swing_lookback: usize,
    /// Set when the instance tripped an invariant; its account is frozen and
    /// it no longer receives events.
    pub quarantined: bool,
}

impl StrategyInstance {
    pub fn new(spec: StrategySpec, intervals: &[Interval]) -> Self {
        let indicators = intervals
            .iter()
            .map(|iv| (*iv, IndicatorSet::new(&spec.indicator_config)))
            .collect();
        Self {
            strategy: spec.strategy,
            account: SimAccount::new(spec.initial_capital),
            indicators,
            cooldown_bars: 0,
            cooldown_after_stop: spec.cooldown_after_stop,
            swing_lookback: spec.swing_lookback,
            quarantined: false,
        }
    }

    pub fn id(&self) -> &str {
        self.strategy.id()
    }
}
