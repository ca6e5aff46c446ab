use std::collections::VecDeque;

use model::Bar;
use serde::{Deserialize, Serialize};

use crate::atr::Atr;
use crate::ema::Ema;
use crate::macd::Macd;
use crate::rsi::Rsi;
use crate::snapshot::IndicatorSnapshot;

/// How many committed snapshots the set retains for prev(k) access.
const HISTORY_SIZE: usize = 3;

/// Indicator lengths for one `(strategy, interval)` engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_slow: 60,
            rsi: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr: 14,
        }
    }
}

impl IndicatorConfig {
    /// Closed bars before every indicator in the set is seeded.
    pub fn min_warmup_bars(&self) -> usize {
        self.ema_fast
            .max(self.ema_slow)
            .max(self.rsi + 1)
            .max(self.macd_slow + self.macd_signal)
            .max(self.atr + 1)
    }
}

/// The full indicator state for one `(strategy, interval)` pair.
///
/// `commit` advances on a closed bar and freezes the snapshot; `preview`
/// computes what the snapshot would be if the open bar closed now, leaving
/// committed state untouched. Slopes always measure against the last commit.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    ema_fast: Ema,
    ema_slow: Ema,
    rsi: Rsi,
    macd: Macd,
    atr: Atr,
    committed: VecDeque<IndicatorSnapshot>,
}

impl IndicatorSet {
    pub fn new(cfg: &IndicatorConfig) -> Self {
        Self {
            ema_fast: Ema::new(cfg.ema_fast),
            ema_slow: Ema::new(cfg.ema_slow),
            rsi: Rsi::new(cfg.rsi),
            macd: Macd::new(cfg.macd_fast, cfg.macd_slow, cfg.macd_signal),
            atr: Atr::new(cfg.atr),
            committed: VecDeque::with_capacity(HISTORY_SIZE + 1),
        }
    }

    /// Latest committed snapshot.
    pub fn current(&self) -> Option<&IndicatorSnapshot> {
        self.committed.back()
    }

    /// The k-th snapshot before the latest commit (k = 1 is the previous).
    pub fn prev(&self, k: usize) -> Option<&IndicatorSnapshot> {
        let len = self.committed.len();
        if k >= len {
            return None;
        }
        self.committed.get(len - 1 - k)
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    /// Advance every indicator with a closed bar. Returns the frozen
    /// snapshot once all components are seeded.
    pub fn commit(&mut self, bar: &Bar) -> Option<IndicatorSnapshot> {
        let ema_fast = self.ema_fast.update(bar.close);
        let ema_slow = self.ema_slow.update(bar.close);
        let rsi = self.rsi.update(bar.close);
        let macd = self.macd.update(bar.close);
        let atr = self.atr.update(bar);

        let snap = self.build_snapshot(
            bar.open_time,
            ema_fast?,
            ema_slow?,
            rsi?,
            macd?.macd,
            macd?.signal,
            macd?.hist,
            atr?,
        );

        self.committed.push_back(snap);
        while self.committed.len() > HISTORY_SIZE {
            self.committed.pop_front();
        }
        Some(snap)
    }

    /// Snapshot as if the open bar closed at its current price. Pure.
    pub fn preview(&self, bar: &Bar) -> Option<IndicatorSnapshot> {
        let ema_fast = self.ema_fast.preview(bar.close)?;
        let ema_slow = self.ema_slow.preview(bar.close)?;
        let rsi = self.rsi.preview(bar.close)?;
        let macd = self.macd.preview(bar.close)?;
        let atr = self.atr.preview(bar)?;

        Some(self.build_snapshot(
            bar.open_time,
            ema_fast,
            ema_slow,
            rsi,
            macd.macd,
            macd.signal,
            macd.hist,
            atr,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_snapshot(
        &self,
        open_time: i64,
        ema_fast: f64,
        ema_slow: f64,
        rsi: f64,
        macd: f64,
        macd_signal: f64,
        macd_hist: f64,
        atr: f64,
    ) -> IndicatorSnapshot {
        // Slopes measure against the last commit, also in preview mode:
        // "is momentum turning this bar?"
        let prev = self.committed.back();
        IndicatorSnapshot {
            open_time,
            ema_fast,
            ema_slow,
            rsi,
            macd,
            macd_signal,
            macd_hist,
            atr,
            ema_fast_slope: prev.map_or(0.0, |p| ema_fast - p.ema_fast),
            ema_slow_slope: prev.map_or(0.0, |p| ema_slow - p.ema_slow),
            rsi_slope: prev.map_or(0.0, |p| rsi - p.rsi),
            macd_hist_slope: prev.map_or(0.0, |p| macd_hist - p.macd_hist),
            atr_slope: prev.map_or(0.0, |p| atr - p.atr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{BarSource, Interval};

    fn bar(i: i64, close: f64) -> Bar {
        Bar {
            interval: Interval::M15,
            open_time: i * 900_000,
            close_time: (i + 1) * 900_000 - 1,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            trades: 100,
            is_closed: true,
            source: BarSource::Rest,
        }
    }

    fn small_cfg() -> IndicatorConfig {
        IndicatorConfig {
            ema_fast: 3,
            ema_slow: 5,
            rsi: 3,
            macd_fast: 3,
            macd_slow: 5,
            macd_signal: 2,
            atr: 3,
        }
    }

    fn feed(set: &mut IndicatorSet, n: usize) {
        for i in 0..n {
            let close = 100.0 + (i as f64 * 0.9).sin() * 3.0 + i as f64 * 0.05;
            set.commit(&bar(i as i64, close));
        }
    }

    #[test]
    fn test_ready_after_min_warmup() {
        let cfg = small_cfg();
        let mut set = IndicatorSet::new(&cfg);
        let min = cfg.min_warmup_bars(); // max(5, 4, 7, 4) = 7

        for i in 0..min - 1 {
            assert!(
                set.commit(&bar(i as i64, 100.0 + i as f64)).is_none(),
                "bar {} should not complete warmup",
                i
            );
        }
        assert!(set
            .commit(&bar(min as i64 - 1, 100.0 + min as f64))
            .is_some());
    }

    #[test]
    fn test_incremental_equals_fresh_replay() {
        // The reproducibility contract: a fresh engine fed the same closed
        // bars lands on identical values.
        let cfg = small_cfg();
        let mut live = IndicatorSet::new(&cfg);
        feed(&mut live, 50);

        let mut replay = IndicatorSet::new(&cfg);
        feed(&mut replay, 50);

        let a = live.current().unwrap();
        let b = replay.current().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let cfg = small_cfg();
        let mut set = IndicatorSet::new(&cfg);
        feed(&mut set, 20);

        let before = *set.current().unwrap();
        let mut open_bar = bar(20, 137.0);
        open_bar.is_closed = false;

        let p1 = set.preview(&open_bar).unwrap();
        let p2 = set.preview(&open_bar).unwrap();

        assert_eq!(*set.current().unwrap(), before);
        assert_eq!(p1, p2); // restartable

        // Committing the same price must reproduce the previewed values
        let committed = set.commit(&bar(20, 137.0)).unwrap();
        assert!((committed.ema_fast - p1.ema_fast).abs() < 1e-12);
        assert!((committed.rsi - p1.rsi).abs() < 1e-12);
        assert!((committed.macd_hist - p1.macd_hist).abs() < 1e-12);
        assert!((committed.atr - p1.atr).abs() < 1e-12);
    }

    #[test]
    fn test_slopes_measure_last_commit() {
        let cfg = small_cfg();
        let mut set = IndicatorSet::new(&cfg);
        feed(&mut set, 20);

        let last = *set.current().unwrap();
        let mut open_bar = bar(20, 150.0);
        open_bar.is_closed = false;

        let preview = set.preview(&open_bar).unwrap();
        assert!((preview.rsi_slope - (preview.rsi - last.rsi)).abs() < 1e-12);
        assert!(
            (preview.macd_hist_slope - (preview.macd_hist - last.macd_hist)).abs() < 1e-12
        );
    }

    #[test]
    fn test_prev_access() {
        let cfg = small_cfg();
        let mut set = IndicatorSet::new(&cfg);
        feed(&mut set, 20);

        let current = *set.current().unwrap();
        let prev1 = *set.prev(1).unwrap();
        let prev2 = *set.prev(2).unwrap();

        assert!(current.open_time > prev1.open_time);
        assert!(prev1.open_time > prev2.open_time);
        assert!(set.prev(3).is_none()); // history keeps three snapshots
    }
}
