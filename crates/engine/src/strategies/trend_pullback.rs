//! Trend-following pullback strategy.
//!
//! A higher timeframe gates direction; entries fire on the execution
//! timeframe when price pulls back to the fast EMA inside an intact trend
//! with momentum turning back in. Stops are the wider of the recent swing and
//! an ATR distance; targets sit at 1R and 2R with a breakeven move after the
//! first.

use execution_sim::resolve_preview_exit;
use model::{CloseReason, Interval, PositionSide};
use strategy_core::{
    ConditionChecklist, ConditionRow, EntrySignal, EvalCtx, ExitAction, IndicatorView, Strategy,
    StrategyIntent, TrendView,
};

use super::StrategyTuning;

pub struct TrendPullbackStrategy {
    id: String,
    tuning: StrategyTuning,
    exec_interval: Interval,
    trend_interval: Interval,
}

impl TrendPullbackStrategy {
    pub fn new(
        id: &str,
        tuning: StrategyTuning,
        exec_interval: Interval,
        trend_interval: Interval,
    ) -> Self {
        Self {
            id: id.to_string(),
            tuning,
            exec_interval,
            trend_interval,
        }
    }

    fn trend_allows_long(&self, trend: &TrendView) -> bool {
        let i = &trend.ind;
        if !(trend.close > i.ema_slow && i.ema_fast > i.ema_slow && i.rsi > 50.0) {
            return false;
        }
        (i.ema_fast - i.ema_slow).abs() / trend.close >= self.tuning.trend_strength_min
    }

    fn trend_allows_short(&self, trend: &TrendView) -> bool {
        let i = &trend.ind;
        if !(trend.close < i.ema_slow && i.ema_fast < i.ema_slow && i.rsi < 50.0) {
            return false;
        }
        (i.ema_fast - i.ema_slow).abs() / trend.close >= self.tuning.trend_strength_min
    }

    fn macd_hist_rising(ind: &IndicatorView) -> bool {
        match (ind.prev2, ind.prev) {
            (Some(p2), Some(p1)) => {
                p2.macd_hist < p1.macd_hist && p1.macd_hist < ind.current.macd_hist
            }
            _ => false,
        }
    }

    fn macd_hist_falling(ind: &IndicatorView) -> bool {
        match (ind.prev2, ind.prev) {
            (Some(p2), Some(p1)) => {
                p2.macd_hist > p1.macd_hist && p1.macd_hist > ind.current.macd_hist
            }
            _ => false,
        }
    }

    /// The wider of the structural stop and the ATR stop: for longs the lower
    /// price, for shorts the higher.
    fn choose_stop(&self, side: PositionSide, entry: f64, atr: f64, structural: Option<f64>) -> f64 {
        match side {
            PositionSide::Long => {
                let atr_stop = entry - self.tuning.atr_stop_mult * atr;
                structural.map_or(atr_stop, |s| s.min(atr_stop))
            }
            PositionSide::Short => {
                let atr_stop = entry + self.tuning.atr_stop_mult * atr;
                structural.map_or(atr_stop, |s| s.max(atr_stop))
            }
        }
    }

    fn targets(entry: f64, stop: f64) -> (f64, f64) {
        let r = (entry - stop).abs();
        if entry > stop {
            (entry + r, entry + 2.0 * r)
        } else {
            (entry - r, entry - 2.0 * r)
        }
    }

    fn try_entry(&self, ctx: &EvalCtx<'_>) -> Option<EntrySignal> {
        let ind = ctx.ind.as_ref()?;
        let trend = ctx.trend.as_ref()?;
        let i = &ind.current;
        let bar = ctx.bar;

        if self.trend_allows_long(trend) {
            let rsi_ok = i.rsi >= self.tuning.rsi_long_lower
                && i.rsi <= self.tuning.rsi_long_upper
                && (!self.tuning.rsi_slope_required || i.rsi_slope > 0.0);
            if bar.low <= i.ema_fast
                && bar.close > i.ema_slow
                && rsi_ok
                && Self::macd_hist_rising(ind)
            {
                let entry = bar.close;
                let stop = self.choose_stop(PositionSide::Long, entry, i.atr, ctx.swing_low);
                if stop < entry {
                    let (tp1, tp2) = Self::targets(entry, stop);
                    return Some(EntrySignal {
                        side: PositionSide::Long,
                        entry_price: entry,
                        stop_price: stop,
                        tp1_price: tp1,
                        tp2_price: tp2,
                        reason: "signal_long".to_string(),
                    });
                }
            }
        }

        if self.trend_allows_short(trend) {
            let rsi_ok = i.rsi <= self.tuning.rsi_short_upper
                && i.rsi >= self.tuning.rsi_short_lower
                && (!self.tuning.rsi_slope_required || i.rsi_slope < 0.0);
            if bar.high >= i.ema_fast
                && bar.close < i.ema_slow
                && rsi_ok
                && Self::macd_hist_falling(ind)
            {
                let entry = bar.close;
                let stop = self.choose_stop(PositionSide::Short, entry, i.atr, ctx.swing_high);
                if stop > entry {
                    let (tp1, tp2) = Self::targets(entry, stop);
                    return Some(EntrySignal {
                        side: PositionSide::Short,
                        entry_price: entry,
                        stop_price: stop,
                        tp1_price: tp1,
                        tp2_price: tp2,
                        reason: "signal_short".to_string(),
                    });
                }
            }
        }

        None
    }
}

impl Strategy for TrendPullbackStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "trend_pullback"
    }

    fn on_bar_commit(&mut self, ctx: &EvalCtx<'_>) -> Option<StrategyIntent> {
        if ctx.interval != self.exec_interval {
            return None;
        }

        // Trend-failure exit is a close-only decision
        if let Some(pos) = ctx.position {
            let i = &ctx.ind.as_ref()?.current;
            let failed = match pos.side {
                PositionSide::Long => ctx.bar.close < i.ema_fast && i.rsi < 50.0,
                PositionSide::Short => ctx.bar.close > i.ema_fast && i.rsi > 50.0,
            };
            if failed {
                return Some(StrategyIntent::Exit(ExitAction::new(
                    CloseReason::TrendFail,
                    ctx.bar.close,
                )));
            }
            return None;
        }

        if ctx.cooldown_bars_remaining > 0 {
            return None;
        }

        self.try_entry(ctx).map(StrategyIntent::Enter)
    }

    fn on_bar_preview(&mut self, ctx: &EvalCtx<'_>) -> Option<ExitAction> {
        if ctx.interval != self.exec_interval {
            return None;
        }
        let pos = ctx.position?;
        resolve_preview_exit(pos, ctx.bar)
    }

    fn describe_conditions(&self, ctx: &EvalCtx<'_>) -> ConditionChecklist {
        let mut checklist = ConditionChecklist::default();

        if ctx.has_position() {
            let row = ConditionRow::new("position open", false);
            checklist.long.push(row.clone());
            checklist.short.push(row);
            return checklist;
        }
        if ctx.cooldown_bars_remaining > 0 {
            let row = ConditionRow::new(
                format!("cooling down ({} bars)", ctx.cooldown_bars_remaining),
                false,
            );
            checklist.long.push(row.clone());
            checklist.short.push(row);
            return checklist;
        }
        let (Some(ind), Some(trend)) = (ctx.ind.as_ref(), ctx.trend.as_ref()) else {
            let row = ConditionRow::new("indicators warming up", false);
            checklist.long.push(row.clone());
            checklist.short.push(row);
            return checklist;
        };

        let i = &ind.current;
        let bar = ctx.bar;

        checklist.long = vec![
            ConditionRow::with_value(
                "trend up",
                self.trend_allows_long(trend),
                format!(
                    "close={:.2} ema_fast={:.2} ema_slow={:.2} rsi={:.1}",
                    trend.close, trend.ind.ema_fast, trend.ind.ema_slow, trend.ind.rsi
                ),
            ),
            ConditionRow::with_value(
                "pullback to fast ema",
                bar.low <= i.ema_fast,
                format!("low={:.2} ema_fast={:.2}", bar.low, i.ema_fast),
            ),
            ConditionRow::with_value(
                "close above slow ema",
                bar.close > i.ema_slow,
                format!("close={:.2} ema_slow={:.2}", bar.close, i.ema_slow),
            ),
            ConditionRow::with_value(
                "rsi in long band",
                i.rsi >= self.tuning.rsi_long_lower && i.rsi <= self.tuning.rsi_long_upper,
                format!(
                    "rsi={:.1} band=[{:.0},{:.0}]",
                    i.rsi, self.tuning.rsi_long_lower, self.tuning.rsi_long_upper
                ),
            ),
            ConditionRow::with_value(
                "rsi turning up",
                !self.tuning.rsi_slope_required || i.rsi_slope > 0.0,
                format!("slope={:.2}", i.rsi_slope),
            ),
            ConditionRow::with_value(
                "macd hist rising",
                Self::macd_hist_rising(ind),
                format!("hist={:.4}", i.macd_hist),
            ),
        ];

        checklist.short = vec![
            ConditionRow::with_value(
                "trend down",
                self.trend_allows_short(trend),
                format!(
                    "close={:.2} ema_fast={:.2} ema_slow={:.2} rsi={:.1}",
                    trend.close, trend.ind.ema_fast, trend.ind.ema_slow, trend.ind.rsi
                ),
            ),
            ConditionRow::with_value(
                "pullback to fast ema",
                bar.high >= i.ema_fast,
                format!("high={:.2} ema_fast={:.2}", bar.high, i.ema_fast),
            ),
            ConditionRow::with_value(
                "close below slow ema",
                bar.close < i.ema_slow,
                format!("close={:.2} ema_slow={:.2}", bar.close, i.ema_slow),
            ),
            ConditionRow::with_value(
                "rsi in short band",
                i.rsi >= self.tuning.rsi_short_lower && i.rsi <= self.tuning.rsi_short_upper,
                format!(
                    "rsi={:.1} band=[{:.0},{:.0}]",
                    i.rsi, self.tuning.rsi_short_lower, self.tuning.rsi_short_upper
                ),
            ),
            ConditionRow::with_value(
                "rsi turning down",
                !self.tuning.rsi_slope_required || i.rsi_slope < 0.0,
                format!("slope={:.2}", i.rsi_slope),
            ),
            ConditionRow::with_value(
                "macd hist falling",
                Self::macd_hist_falling(ind),
                format!("hist={:.4}", i.macd_hist),
            ),
        ];

        checklist
    }
}
