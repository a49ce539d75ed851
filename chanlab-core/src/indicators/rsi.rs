//! Relative Strength Index (RSI), streaming form.
//!
//! The first bar reports 50. While fewer than `period` changes exist, the
//! average gain/loss is the sum of gains/losses so far divided by `period`.
//! Afterwards Wilder smoothing applies:
//! avg[t] = (avg[t-1] * (period - 1) + x) / period
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss), with RS = 0 when avg_loss == 0.

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    last_close: Option<f64>,
    changes: usize,
    sum_gain: f64,
    sum_loss: f64,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            last_close: None,
            changes: 0,
            sum_gain: 0.0,
            sum_loss: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    pub fn add(&mut self, close: f64) -> f64 {
        let Some(prev) = self.last_close.replace(close) else {
            return 50.0;
        };
        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.changes += 1;
        let n = self.period as f64;
        if self.changes < self.period {
            self.sum_gain += gain;
            self.sum_loss += loss;
            self.avg_gain = self.sum_gain / n;
            self.avg_loss = self.sum_loss / n;
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }
        let rs = if self.avg_loss != 0.0 {
            self.avg_gain / self.avg_loss
        } else {
            0.0
        };
        100.0 - 100.0 / (1.0 + rs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::assert_approx;

    #[test]
    fn first_value_is_neutral() {
        let mut rsi = Rsi::new(14);
        assert_eq!(rsi.add(100.0), 50.0);
    }

    #[test]
    fn mixed_changes_within_seed_window() {
        // changes: +2, -1 → avg_gain = 2/3, avg_loss = 1/3 → rs = 2
        let mut rsi = Rsi::new(3);
        rsi.add(10.0);
        rsi.add(12.0);
        let v = rsi.add(11.0);
        assert_approx(v, 100.0 - 100.0 / 3.0, 1e-9);
    }

    #[test]
    fn all_gains_report_zero_strength() {
        // avg_loss stays 0, RS is defined as 0
        let mut rsi = Rsi::new(3);
        rsi.add(1.0);
        assert_eq!(rsi.add(2.0), 0.0);
    }

    #[test]
    fn rsi_bounds() {
        let mut rsi = Rsi::new(3);
        for close in [100.0, 105.0, 98.0, 110.0, 95.0, 115.0, 90.0, 120.0] {
            let v = rsi.add(close);
            assert!((0.0..=100.0).contains(&v), "RSI out of bounds: {v}");
        }
    }
}
