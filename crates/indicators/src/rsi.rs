/// Relative Strength Index with Wilder smoothing.
///
/// Seeded with the simple average of gains/losses over the first `length`
/// deltas, then `avg = (avg * (n - 1) + x) / n`. Output is pinned at 100 when
/// the loss average is zero and 0 when the gain average is zero.
#[derive(Debug, Clone)]
pub struct Rsi {
    length: usize,
    last_close: Option<f64>,
    seed_gains: f64,
    seed_losses: f64,
    seed_count: usize,
    averages: Option<(f64, f64)>,
}

impl Rsi {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
            last_close: None,
            seed_gains: 0.0,
            seed_losses: 0.0,
            seed_count: 0,
            averages: None,
        }
    }

    /// Closed bars needed before `value()` is available (deltas need a
    /// previous close).
    pub fn warmup_bars(&self) -> usize {
        self.length + 1
    }

    pub fn value(&self) -> Option<f64> {
        self.averages.map(|(g, l)| Self::rsi_from(g, l))
    }

    fn rsi_from(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_loss == 0.0 {
            100.0
        } else if avg_gain == 0.0 {
            0.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        }
    }

    /// Advance with a committed close.
    pub fn update(&mut self, close: f64) -> Option<f64> {
        let Some(prev) = self.last_close else {
            self.last_close = Some(close);
            return None;
        };

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        match self.averages {
            None => {
                self.seed_gains += gain;
                self.seed_losses += loss;
                self.seed_count += 1;
                if self.seed_count == self.length {
                    self.averages = Some((
                        self.seed_gains / self.length as f64,
                        self.seed_losses / self.length as f64,
                    ));
                }
            }
            Some((avg_gain, avg_loss)) => {
                let n = self.length as f64;
                self.averages = Some((
                    (avg_gain * (n - 1.0) + gain) / n,
                    (avg_loss * (n - 1.0) + loss) / n,
                ));
            }
        }

        self.last_close = Some(close);
        self.value()
    }

    /// The value one Wilder step ahead, without mutating state.
    pub fn preview(&self, close: f64) -> Option<f64> {
        let (avg_gain, avg_loss) = self.averages?;
        let prev = self.last_close?;

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.length as f64;

        Some(Self::rsi_from(
            (avg_gain * (n - 1.0) + gain) / n,
            (avg_loss * (n - 1.0) + loss) / n,
        ))
    }
}
