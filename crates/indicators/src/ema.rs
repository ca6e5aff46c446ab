/// Exponential moving average, incremental.
///
/// Seeded with the simple average of the first `length` inputs, then
/// `e += alpha * (p - e)` with `alpha = 2 / (length + 1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    length: usize,
    alpha: f64,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
            alpha: 2.0 / (length.max(1) as f64 + 1.0),
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
        }
    }

    /// Closed bars needed before `value()` is available.
    pub fn warmup_bars(&self) -> usize {
        self.length
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Advance with a committed price.
    pub fn update(&mut self, price: f64) -> Option<f64> {
        match self.value {
            None => {
                self.seed_sum += price;
                self.seed_count += 1;
                if self.seed_count == self.length {
                    self.value = Some(self.seed_sum / self.length as f64);
                }
            }
            Some(v) => {
                self.value = Some(v + self.alpha * (price - v));
            }
        }
        self.value
    }

    /// The value one step ahead, without mutating state. `None` until seeded.
    pub fn preview(&self, price: f64) -> Option<f64> {
        self.value.map(|v| v + self.alpha * (price - v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeds_with_simple_average() {
        let mut ema = Ema::new(3);
        assert_eq!(ema.update(10.0), None);
        assert_eq!(ema.update(11.0), None);
        // Seed = (10 + 11 + 12) / 3 = 11
        assert_eq!(ema.update(12.0), Some(11.0));
    }

    #[test]
    fn test_advances_after_seed() {
        let mut ema = Ema::new(3);
        ema.update(10.0);
        ema.update(11.0);
        ema.update(12.0);
        // alpha = 0.5: 11 + 0.5 * (13 - 11) = 12
        assert_eq!(ema.update(13.0), Some(12.0));
    }

    #[test]
    fn test_preview_is_pure() {
        let mut ema = Ema::new(3);
        for p in [10.0, 11.0, 12.0] {
            ema.update(p);
        }
        let before = ema.value();
        assert_eq!(ema.preview(13.0), Some(12.0));
        assert_eq!(ema.value(), before);

        // Committing the same price must equal the preview
        assert_eq!(ema.update(13.0), Some(12.0));
    }

    #[test]
    fn test_preview_none_before_seed() {
        let ema = Ema::new(5);
        assert_eq!(ema.preview(100.0), None);
    }
}
