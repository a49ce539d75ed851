//! Bar: the raw price unit fed into every level.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ChanError;

/// OHLC bar with optional trade statistics.
///
/// Bars are immutable once they enter a level. Trade statistics are optional
/// because not every feed carries them; metrics that need a missing field
/// evaluate to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub turnover: Option<f64>,
    #[serde(default)]
    pub turnrate: Option<f64>,
}

impl Bar {
    pub fn new(time: NaiveDateTime, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume: None,
            turnover: None,
            turnrate: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_turnover(mut self, turnover: f64) -> Self {
        self.turnover = Some(turnover);
        self
    }

    pub fn with_turnrate(mut self, turnrate: f64) -> Self {
        self.turnrate = Some(turnrate);
        self
    }

    /// Returns true if any OHLC field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Enforce `low <= min(O,H,L,C)` and `high >= max(O,H,L,C)`.
    ///
    /// With `autofix` the offending extreme is replaced by the true min/max,
    /// otherwise the bar is rejected with [`ChanError::Data`].
    pub fn check(&mut self, autofix: bool) -> Result<(), ChanError> {
        if self.is_void() {
            return Err(ChanError::Data {
                time: self.time,
                reason: "NaN price".into(),
            });
        }
        let min = self.open.min(self.high).min(self.low).min(self.close);
        if self.low > min {
            if !autofix {
                return Err(ChanError::Data {
                    time: self.time,
                    reason: format!("low {} above bar minimum {min}", self.low),
                });
            }
            self.low = min;
        }
        let max = self.open.max(self.high).max(self.low).max(self.close);
        if self.high < max {
            if !autofix {
                return Err(ChanError::Data {
                    time: self.time,
                    reason: format!("high {} below bar maximum {max}", self.high),
                });
            }
            self.high = max;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn sane_bar_passes_check() {
        let mut bar = Bar::new(t0(), 100.0, 105.0, 98.0, 103.0);
        bar.check(false).unwrap();
        assert_eq!(bar.low, 98.0);
        assert_eq!(bar.high, 105.0);
    }

    #[test]
    fn inverted_bar_is_rejected_without_autofix() {
        let mut bar = Bar::new(t0(), 4.5, 4.0, 5.0, 4.5);
        let err = bar.check(false).unwrap_err();
        assert!(matches!(err, ChanError::Data { .. }));
    }

    #[test]
    fn inverted_bar_is_corrected_with_autofix() {
        let mut bar = Bar::new(t0(), 4.5, 4.0, 5.0, 4.5);
        bar.check(true).unwrap();
        // low takes the true minimum, then high the maximum of the fixed bar
        assert_eq!(bar.low, 4.0);
        assert_eq!(bar.high, 4.5);
    }

    #[test]
    fn nan_bar_is_rejected_even_with_autofix() {
        let mut bar = Bar::new(t0(), f64::NAN, 1.0, 1.0, 1.0);
        assert!(bar.is_void());
        assert!(bar.check(true).is_err());
    }

    #[test]
    fn bar_serialization_roundtrip() {
        let bar = Bar::new(t0(), 1.0, 2.0, 0.5, 1.5).with_volume(10.0);
        let json = serde_json::to_string(&bar).unwrap();
        let deser: Bar = serde_json::from_str(&json).unwrap();
        assert_eq!(bar, deser);
    }
}
