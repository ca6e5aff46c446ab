use serde::{Deserialize, Serialize};

/// All indicator values for one bar, plus per-field slopes against the
/// previous committed snapshot. Preview snapshots are transient; committed
/// ones are frozen on bar close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub open_time: i64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub atr: f64,
    pub ema_fast_slope: f64,
    pub ema_slow_slope: f64,
    pub rsi_slope: f64,
    pub macd_hist_slope: f64,
    pub atr_slope: f64,
}
