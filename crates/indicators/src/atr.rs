use model::Bar;

/// Average True Range with Wilder smoothing.
///
/// TR = max(h - l, |h - prev_close|, |l - prev_close|); seeded with the
/// simple mean of the first `length` TRs.
#[derive(Debug, Clone)]
pub struct Atr {
    length: usize,
    last_close: Option<f64>,
    seed_sum: f64,
    seed_count: usize,
    atr: Option<f64>,
}

impl Atr {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
            last_close: None,
            seed_sum: 0.0,
            seed_count: 0,
            atr: None,
        }
    }

    /// Closed bars needed before `value()` is available (the first bar only
    /// provides the previous close).
    pub fn warmup_bars(&self) -> usize {
        self.length + 1
    }

    pub fn value(&self) -> Option<f64> {
        self.atr
    }

    fn true_range(bar: &Bar, prev_close: f64) -> f64 {
        (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs())
    }

    /// Advance with a committed bar.
    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let Some(prev) = self.last_close else {
            self.last_close = Some(bar.close);
            return None;
        };

        let tr = Self::true_range(bar, prev);

        match self.atr {
            None => {
                self.seed_sum += tr;
                self.seed_count += 1;
                if self.seed_count == self.length {
                    self.atr = Some(self.seed_sum / self.length as f64);
                }
            }
            Some(v) => {
                let n = self.length as f64;
                self.atr = Some((v * (n - 1.0) + tr) / n);
            }
        }

        self.last_close = Some(bar.close);
        self.atr
    }

    /// One Wilder step ahead, without mutating state.
    pub fn preview(&self, bar: &Bar) -> Option<f64> {
        let atr = self.atr?;
        let prev = self.last_close?;
        let tr = Self::true_range(bar, prev);
        let n = self.length as f64;
        Some((atr * (n - 1.0) + tr) / n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{BarSource, Interval};

    fn bar(high: f64, low: f64, close: f64) -> Bar {
        Bar {
            interval: Interval::M15,
            open_time: 0,
            close_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 0.0,
            trades: 0,
            is_closed: true,
            source: BarSource::Rest,
        }
    }

    #[test]
    fn test_seed_is_mean_of_first_trs() {
        let mut atr = Atr::new(2);
        assert_eq!(atr.update(&bar(101.0, 99.0, 100.0)), None); // prev close only
        assert_eq!(atr.update(&bar(102.0, 100.0, 101.0)), None); // TR = 2
        // TR = max(4, |104-101|, |100-101|) = 4; seed = (2 + 4) / 2 = 3
        assert_eq!(atr.update(&bar(104.0, 100.0, 103.0)), Some(3.0));
    }

    #[test]
    fn test_wilder_smoothing_after_seed() {
        let mut atr = Atr::new(2);
        atr.update(&bar(101.0, 99.0, 100.0));
        atr.update(&bar(102.0, 100.0, 101.0));
        atr.update(&bar(104.0, 100.0, 103.0));
        // TR = max(1, |104-103|, |103-103|) = 1; (3 * 1 + 1) / 2 = 2
        assert_eq!(atr.update(&bar(104.0, 103.0, 103.5)), Some(2.0));
    }

    #[test]
    fn test_true_range_uses_gap_from_prev_close() {
        let mut atr = Atr::new(1);
        atr.update(&bar(101.0, 99.0, 100.0));
        // Gapped bar: range is 1 but distance from prev close is 9
        assert_eq!(atr.update(&bar(110.0, 109.0, 109.5)), Some(10.0));
    }

    #[test]
    fn test_preview_is_pure() {
        let mut atr = Atr::new(2);
        atr.update(&bar(101.0, 99.0, 100.0));
        atr.update(&bar(102.0, 100.0, 101.0));
        atr.update(&bar(104.0, 100.0, 103.0));

        let before = atr.value();
        let previewed = atr.preview(&bar(104.0, 103.0, 103.5));
        assert_eq!(atr.value(), before);
        assert_eq!(previewed, Some(2.0));
    }
}
