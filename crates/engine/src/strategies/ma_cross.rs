//! Dual-EMA crossover strategy: long while the fast EMA rides above the slow
//! one with the trend RSI confirming, flat (or short) on the mirror. Mostly
//! useful as a smoke-test profile next to the pullback strategy.

use execution_sim::resolve_preview_exit;
use model::{CloseReason, Interval, PositionSide};
use strategy_core::{
    ConditionChecklist, ConditionRow, EntrySignal, EvalCtx, ExitAction, Strategy, StrategyIntent,
};

use super::StrategyTuning;

pub struct MaCrossStrategy {
    id: String,
    tuning: StrategyTuning,
    exec_interval: Interval,
}

impl MaCrossStrategy {
    pub fn new(id: &str, tuning: StrategyTuning, exec_interval: Interval) -> Self {
        Self {
            id: id.to_string(),
            tuning,
            exec_interval,
        }
    }

    fn stop_for(&self, side: PositionSide, entry: f64, atr: f64, structural: Option<f64>) -> f64 {
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
}

impl Strategy for MaCrossStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "ma_cross"
    }

    fn on_bar_commit(&mut self, ctx: &EvalCtx<'_>) -> Option<StrategyIntent> {
        if ctx.interval != self.exec_interval {
            return None;
        }
        let ind = ctx.ind.as_ref()?;
        let i = &ind.current;

        // Exit on trend flip
        if let Some(pos) = ctx.position {
            let flipped = match pos.side {
                PositionSide::Long => i.ema_fast < i.ema_slow,
                PositionSide::Short => i.ema_fast > i.ema_slow,
            };
            if flipped {
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
        let trend = ctx.trend.as_ref()?;

        let (side, structural) = if i.ema_fast > i.ema_slow && trend.ind.rsi > 50.0 {
            (PositionSide::Long, ctx.swing_low)
        } else if i.ema_fast < i.ema_slow && trend.ind.rsi < 50.0 {
            (PositionSide::Short, ctx.swing_high)
        } else {
            return None;
        };

        let entry = ctx.bar.close;
        let stop = self.stop_for(side, entry, i.atr, structural);
        let r = (entry - stop).abs();
        if r <= 0.0 {
            return None;
        }
        let dir = side.dir();
        Some(StrategyIntent::Enter(EntrySignal {
            side,
            entry_price: entry,
            stop_price: stop,
            tp1_price: entry + dir * r,
            tp2_price: entry + dir * 2.0 * r,
            reason: match side {
                PositionSide::Long => "ma_long".to_string(),
                PositionSide::Short => "ma_short".to_string(),
            },
        }))
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
        let (Some(ind), Some(trend)) = (ctx.ind.as_ref(), ctx.trend.as_ref()) else {
            let row = ConditionRow::new("indicators warming up", false);
            checklist.long.push(row.clone());
            checklist.short.push(row);
            return checklist;
        };
        let i = &ind.current;

        checklist.long = vec![
            ConditionRow::with_value(
                "fast ema above slow",
                i.ema_fast > i.ema_slow,
                format!("fast={:.2} slow={:.2}", i.ema_fast, i.ema_slow),
            ),
            ConditionRow::with_value(
                "trend rsi above 50",
                trend.ind.rsi > 50.0,
                format!("rsi={:.1}", trend.ind.rsi),
            ),
        ];
        checklist.short = vec![
            ConditionRow::with_value(
                "fast ema below slow",
                i.ema_fast < i.ema_slow,
                format!("fast={:.2} slow={:.2}", i.ema_fast, i.ema_slow),
            ),
            ConditionRow::with_value(
                "trend rsi below 50",
                trend.ind.rsi < 50.0,
                format!("rsi={:.1}", trend.ind.rsi),
            ),
        ];
        checklist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicators::IndicatorSnapshot;
    use model::{AccountState, Bar, BarSource};
    use strategy_core::{IndicatorView, TrendView};

    fn snapshot(ema_fast: f64, ema_slow: f64, rsi: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            open_time: 0,
            ema_fast,
            ema_slow,
            rsi,
            macd: 0.0,
            macd_signal: 0.0,
            macd_hist: 0.0,
            atr: 2.0,
            ema_fast_slope: 0.0,
            ema_slow_slope: 0.0,
            rsi_slope: 0.0,
            macd_hist_slope: 0.0,
            atr_slope: 0.0,
        }
    }

    fn bar(close: f64) -> Bar {
        Bar {
            interval: Interval::M15,
            open_time: 0,
            close_time: 899_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            trades: 1,
            is_closed: true,
            source: BarSource::Ws,
        }
    }

    #[test]
    fn test_long_on_bullish_cross_state() {
        let mut s = MaCrossStrategy::new("smoke", StrategyTuning::default(), Interval::M15);
        let account = AccountState::new(1000.0);
        let b = bar(103.0);
        let ctx = EvalCtx {
            interval: Interval::M15,
            bar: &b,
            ind: Some(IndicatorView {
                current: snapshot(102.0, 100.0, 55.0),
                prev: None,
                prev2: None,
            }),
            trend: Some(TrendView {
                ind: snapshot(101.0, 100.0, 58.0),
                close: 103.0,
            }),
            position: None,
            cooldown_bars_remaining: 0,
            account: &account,
            swing_low: Some(100.5),
            swing_high: None,
        };

        let intent = s.on_bar_commit(&ctx).unwrap();
        let StrategyIntent::Enter(sig) = intent else {
            panic!("expected entry");
        };
        assert_eq!(sig.side, PositionSide::Long);
        // atr stop (103 - 3 = 100) is wider than the swing (100.5)
        assert_eq!(sig.stop_price, 100.0);
    }

    #[test]
    fn test_no_entry_when_rsi_disagrees() {
        let mut s = MaCrossStrategy::new("smoke", StrategyTuning::default(), Interval::M15);
        let account = AccountState::new(1000.0);
        let b = bar(103.0);
        let ctx = EvalCtx {
            interval: Interval::M15,
            bar: &b,
            ind: Some(IndicatorView {
                current: snapshot(102.0, 100.0, 55.0),
                prev: None,
                prev2: None,
            }),
            trend: Some(TrendView {
                ind: snapshot(101.0, 100.0, 45.0),
                close: 103.0,
            }),
            position: None,
            cooldown_bars_remaining: 0,
            account: &account,
            swing_low: None,
            swing_high: None,
        };
        assert!(s.on_bar_commit(&ctx).is_none());
    }
}
