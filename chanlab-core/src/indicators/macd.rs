//! Moving Average Convergence Divergence (MACD).
//!
//! fast[t] = (2 * close + (fast_n - 1) * fast[t-1]) / (fast_n + 1)
//! slow[t] = (2 * close + (slow_n - 1) * slow[t-1]) / (slow_n + 1)
//! DIF = fast - slow
//! DEA[t] = (2 * DIF + (signal_n - 1) * DEA[t-1]) / (signal_n + 1)
//! MACD = 2 * (DIF - DEA)
//! Seed: the first close seeds both EMAs, DIF = DEA = 0.

use serde::{Deserialize, Serialize};

/// MACD state for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacdPoint {
    pub fast_ema: f64,
    pub slow_ema: f64,
    pub dif: f64,
    pub dea: f64,
    pub macd: f64,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    last: Option<MacdPoint>,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast,
            slow,
            signal,
            last: None,
        }
    }

    pub fn add(&mut self, close: f64) -> MacdPoint {
        let point = match self.last {
            None => MacdPoint {
                fast_ema: close,
                slow_ema: close,
                ..MacdPoint::default()
            },
            Some(prev) => {
                let fast_ema = ema_step(close, prev.fast_ema, self.fast);
                let slow_ema = ema_step(close, prev.slow_ema, self.slow);
                let dif = fast_ema - slow_ema;
                let dea = ema_step(dif, prev.dea, self.signal);
                MacdPoint {
                    fast_ema,
                    slow_ema,
                    dif,
                    dea,
                    macd: 2.0 * (dif - dea),
                }
            }
        };
        self.last = Some(point);
        point
    }
}

fn ema_step(value: f64, prev: f64, period: usize) -> f64 {
    let n = period as f64;
    (2.0 * value + (n - 1.0) * prev) / (n + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn first_bar_seeds_without_momentum() {
        let mut macd = Macd::new(12, 26, 9);
        let p = macd.add(10.0);
        assert_eq!(p.fast_ema, 10.0);
        assert_eq!(p.slow_ema, 10.0);
        assert_eq!(p.macd, 0.0);
    }

    #[test]
    fn second_bar_follows_recurrence() {
        let mut macd = Macd::new(3, 5, 2);
        macd.add(10.0);
        let p = macd.add(16.0);
        // fast = (32 + 2*10)/4 = 13, slow = (32 + 4*10)/6 = 12
        assert_approx(p.fast_ema, 13.0, DEFAULT_EPSILON);
        assert_approx(p.slow_ema, 12.0, DEFAULT_EPSILON);
        assert_approx(p.dif, 1.0, DEFAULT_EPSILON);
        // dea = (2*1 + 1*0)/3
        assert_approx(p.dea, 2.0 / 3.0, DEFAULT_EPSILON);
        assert_approx(p.macd, 2.0 * (1.0 - 2.0 / 3.0), DEFAULT_EPSILON);
    }

    #[test]
    fn rising_series_has_positive_histogram() {
        let mut macd = Macd::new(12, 26, 9);
        let mut last = MacdPoint::default();
        for i in 0..40 {
            last = macd.add(100.0 + i as f64);
        }
        assert!(last.dif > 0.0);
        assert!(last.macd > 0.0);
    }
}
