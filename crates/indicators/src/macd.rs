use crate::ema::Ema;

/// MACD line, signal and histogram for one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub hist: f64,
}

/// MACD: difference of two EMAs plus a signal EMA over the difference.
///
/// The signal is seeded at the first MACD value (the step the slow EMA
/// completes its seed) and walked forward from there.
#[derive(Debug, Clone)]
pub struct Macd {
    ema_fast: Ema,
    ema_slow: Ema,
    signal_alpha: f64,
    signal_len: usize,
    slow_len: usize,
    signal: Option<f64>,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            ema_fast: Ema::new(fast),
            ema_slow: Ema::new(slow),
            signal_alpha: 2.0 / (signal.max(1) as f64 + 1.0),
            signal_len: signal.max(1),
            slow_len: slow.max(1),
            signal: None,
        }
    }

    /// Closed bars until the signal EMA has walked its own length.
    pub fn warmup_bars(&self) -> usize {
        self.slow_len + self.signal_len
    }

    pub fn value(&self) -> Option<MacdOutput> {
        let macd = self.ema_fast.value()? - self.ema_slow.value()?;
        let signal = self.signal?;
        Some(MacdOutput {
            macd,
            signal,
            hist: macd - signal,
        })
    }

    /// Advance with a committed close.
    pub fn update(&mut self, price: f64) -> Option<MacdOutput> {
        let fast = self.ema_fast.update(price);
        let slow = self.ema_slow.update(price);

        if let (Some(f), Some(s)) = (fast, slow) {
            let line = f - s;
            self.signal = Some(match self.signal {
                None => line,
                Some(sig) => sig + self.signal_alpha * (line - sig),
            });
        }

        self.value()
    }

    /// One step ahead without mutating state.
    pub fn preview(&self, price: f64) -> Option<MacdOutput> {
        let fast = self.ema_fast.preview(price)?;
        let slow = self.ema_slow.preview(price)?;
        let line = fast - slow;
        let signal = match self.signal {
            None => line,
            Some(sig) => sig + self.signal_alpha * (line - sig),
        };
        Some(MacdOutput {
            macd: line,
            signal,
            hist: line - signal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Naive recomputation: seed both EMAs with simple averages, walk every
    /// remaining close, signal seeded at the first MACD value.
    fn naive_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdOutput> {
        if closes.len() < slow {
            return None;
        }

        let alpha_f = 2.0 / (fast as f64 + 1.0);
        let alpha_s = 2.0 / (slow as f64 + 1.0);
        let alpha_sig = 2.0 / (signal as f64 + 1.0);

        let mut ema_f: Option<f64> = None;
        let mut ema_s: Option<f64> = None;
        let mut sum_f = 0.0;
        let mut sum_s = 0.0;
        let mut sig: Option<f64> = None;

        for (i, &p) in closes.iter().enumerate() {
            match ema_f {
                None => {
                    sum_f += p;
                    if i + 1 == fast {
                        ema_f = Some(sum_f / fast as f64);
                    }
                }
                Some(v) => ema_f = Some(v + alpha_f * (p - v)),
            }
            match ema_s {
                None => {
                    sum_s += p;
                    if i + 1 == slow {
                        ema_s = Some(sum_s / slow as f64);
                    }
                }
                Some(v) => ema_s = Some(v + alpha_s * (p - v)),
            }
            if let (Some(f), Some(s)) = (ema_f, ema_s) {
                let line = f - s;
                sig = Some(match sig {
                    None => line,
                    Some(v) => v + alpha_sig * (line - v),
                });
            }
        }

        let macd = ema_f? - ema_s?;
        let signal_v = sig?;
        Some(MacdOutput {
            macd,
            signal: signal_v,
            hist: macd - signal_v,
        })
    }

    #[test]
    fn test_incremental_matches_naive() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1)
            .collect();

        let mut macd = Macd::new(12, 26, 9);
        let mut last = None;
        for &p in &closes {
            last = macd.update(p);
        }

        let expected = naive_macd(&closes, 12, 26, 9).unwrap();
        let got = last.unwrap();
        assert!((got.macd - expected.macd).abs() < 1e-9);
        assert!((got.signal - expected.signal).abs() < 1e-9);
        assert!((got.hist - expected.hist).abs() < 1e-9);
    }

    #[test]
    fn test_preview_matches_commit() {
        let mut macd = Macd::new(3, 5, 2);
        for i in 0..10 {
            macd.update(100.0 + i as f64);
        }
        let previewed = macd.preview(111.0).unwrap();
        let committed = macd.update(111.0).unwrap();
        assert!((previewed.hist - committed.hist).abs() < 1e-12);
    }

    #[test]
    fn test_none_before_slow_seed() {
        let mut macd = Macd::new(3, 5, 2);
        for i in 0..4 {
            assert!(macd.update(100.0 + i as f64).is_none());
        }
        assert!(macd.update(104.0).is_some());
    }
}
