//! Strength metrics measured over a line's bar-unit span.
//!
//! A divergence test compares the metric of a pivot's entry line (forward)
//! with the metric of the breaking exit line (reverse). Every metric is a
//! pure function of the raw units between the line's first and last merged
//! bar, so lines never cache metric values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::Direction;
use crate::error::ConfigError;
use crate::merge::BarUnit;

/// Selectable divergence metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricAlgo {
    /// Half area: same-sign MACD run from the begin unit forward, or from the end unit backward when reversed.
    Area,
    /// Largest same-sign MACD bar.
    Peak,
    /// Same-sign MACD area between begin and end unit.
    FullArea,
    /// Spread between the largest and smallest MACD bar.
    Diff,
    Slope,
    Amp,
    #[serde(alias = "volumn")]
    Volume,
    Amount,
    #[serde(alias = "volumn_avg")]
    VolumeAvg,
    AmountAvg,
    Turnrate,
    TurnrateAvg,
    Rsi,
}

impl MetricAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricAlgo::Area => "area",
            MetricAlgo::Peak => "peak",
            MetricAlgo::FullArea => "full_area",
            MetricAlgo::Diff => "diff",
            MetricAlgo::Slope => "slope",
            MetricAlgo::Amp => "amp",
            MetricAlgo::Volume => "volume",
            MetricAlgo::Amount => "amount",
            MetricAlgo::VolumeAvg => "volume_avg",
            MetricAlgo::AmountAvg => "amount_avg",
            MetricAlgo::Turnrate => "turnrate",
            MetricAlgo::TurnrateAvg => "turnrate_avg",
            MetricAlgo::Rsi => "rsi",
        }
    }
}

impl fmt::Display for MetricAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricAlgo {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "area" => MetricAlgo::Area,
            "peak" => MetricAlgo::Peak,
            "full_area" => MetricAlgo::FullArea,
            "diff" => MetricAlgo::Diff,
            "slope" => MetricAlgo::Slope,
            "amp" => MetricAlgo::Amp,
            "volume" | "volumn" => MetricAlgo::Volume,
            "amount" => MetricAlgo::Amount,
            "volume_avg" | "volumn_avg" => MetricAlgo::VolumeAvg,
            "amount_avg" => MetricAlgo::AmountAvg,
            "turnrate" => MetricAlgo::Turnrate,
            "turnrate_avg" => MetricAlgo::TurnrateAvg,
            "rsi" => MetricAlgo::Rsi,
            other => {
                return Err(ConfigError::UnknownName {
                    kind: "metric",
                    name: other.to_string(),
                })
            }
        })
    }
}

/// A raw unit referenced by a line endpoint, with its own high/low.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UnitRef {
    pub idx: usize,
    pub high: f64,
    pub low: f64,
}

/// Inclusive range of raw units covered by a line's merged bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnitSpan {
    pub first: usize,
    pub last: usize,
}

const FLOOR: f64 = 1e-7;

#[derive(Clone, Copy)]
enum TradeField {
    Volume,
    Turnover,
    Turnrate,
}

/// Everything a metric needs to know about a line.
#[derive(Debug, Clone, Copy)]
pub struct MetricInput {
    pub dir: Direction,
    pub begin: UnitRef,
    pub end: UnitRef,
    pub span: UnitSpan,
}

impl MetricInput {
    fn units<'a>(&self, units: &'a [BarUnit]) -> &'a [BarUnit] {
        let last = self.span.last.min(units.len().saturating_sub(1));
        units.get(self.span.first..=last).unwrap_or(&[])
    }

    fn same_sign(&self, macd: f64) -> bool {
        match self.dir {
            Direction::Up => macd > 0.0,
            Direction::Down => macd < 0.0,
        }
    }
}

/// Evaluate `algo` for one line. `reverse` only affects [`MetricAlgo::Area`].
pub fn compute(input: &MetricInput, units: &[BarUnit], algo: MetricAlgo, reverse: bool) -> f64 {
    match algo {
        MetricAlgo::Area if reverse => half_reverse(input, units),
        MetricAlgo::Area => half_obverse(input, units),
        MetricAlgo::Peak => peak(input, units),
        MetricAlgo::FullArea => full_area(input, units),
        MetricAlgo::Diff => diff(input, units),
        MetricAlgo::Slope => slope(input),
        MetricAlgo::Amp => amp(input),
        MetricAlgo::Volume => trade_metric(input, units, TradeField::Volume, false),
        MetricAlgo::Amount => trade_metric(input, units, TradeField::Turnover, false),
        MetricAlgo::VolumeAvg => trade_metric(input, units, TradeField::Volume, true),
        MetricAlgo::AmountAvg => trade_metric(input, units, TradeField::Turnover, true),
        MetricAlgo::Turnrate => trade_metric(input, units, TradeField::Turnrate, false),
        MetricAlgo::TurnrateAvg => trade_metric(input, units, TradeField::Turnrate, true),
        MetricAlgo::Rsi => rsi(input, units),
    }
}

fn full_area(input: &MetricInput, units: &[BarUnit]) -> f64 {
    input
        .units(units)
        .iter()
        .filter(|u| u.idx >= input.begin.idx && u.idx <= input.end.idx)
        .map(|u| u.macd.macd)
        .filter(|m| input.same_sign(*m))
        .fold(FLOOR, |acc, m| acc + m.abs())
}

fn peak(input: &MetricInput, units: &[BarUnit]) -> f64 {
    input
        .units(units)
        .iter()
        .map(|u| u.macd.macd)
        .filter(|m| input.same_sign(*m))
        .fold(FLOOR, |acc, m| acc.max(m.abs()))
}

fn half_obverse(input: &MetricInput, units: &[BarUnit]) -> f64 {
    let span = input.units(units);
    let Some(anchor) = span.iter().find(|u| u.idx == input.begin.idx) else {
        return FLOOR;
    };
    let sign = anchor.macd.macd;
    span.iter()
        .skip_while(|u| u.idx < input.begin.idx)
        .take_while(|u| u.macd.macd * sign > 0.0)
        .fold(FLOOR, |acc, u| acc + u.macd.macd.abs())
}

fn half_reverse(input: &MetricInput, units: &[BarUnit]) -> f64 {
    let span = input.units(units);
    let Some(anchor) = span.iter().find(|u| u.idx == input.end.idx) else {
        return FLOOR;
    };
    let sign = anchor.macd.macd;
    span.iter()
        .rev()
        .skip_while(|u| u.idx > input.end.idx)
        .take_while(|u| u.macd.macd * sign > 0.0)
        .fold(FLOOR, |acc, u| acc + u.macd.macd.abs())
}

fn diff(input: &MetricInput, units: &[BarUnit]) -> f64 {
    let (max, min) = input
        .units(units)
        .iter()
        .map(|u| u.macd.macd)
        .fold((f64::NEG_INFINITY, f64::INFINITY), |(hi, lo), m| {
            (hi.max(m), lo.min(m))
        });
    if max.is_finite() && min.is_finite() {
        max - min
    } else {
        0.0
    }
}

fn unit_count(input: &MetricInput) -> f64 {
    (input.end.idx.saturating_sub(input.begin.idx) + 1) as f64
}

fn slope(input: &MetricInput) -> f64 {
    let (b, e) = (input.begin, input.end);
    match input.dir {
        Direction::Up => (e.high - b.low) / e.high / unit_count(input),
        Direction::Down => (b.high - e.low) / b.high / unit_count(input),
    }
}

fn amp(input: &MetricInput) -> f64 {
    let (b, e) = (input.begin, input.end);
    match input.dir {
        Direction::Down => (b.high - e.low) / b.high,
        Direction::Up => (e.high - b.low) / b.low,
    }
}

fn trade_metric(input: &MetricInput, units: &[BarUnit], field: TradeField, avg: bool) -> f64 {
    let mut sum = 0.0;
    for u in input.units(units) {
        let value = match field {
            TradeField::Volume => u.bar.volume,
            TradeField::Turnover => u.bar.turnover,
            TradeField::Turnrate => u.bar.turnrate,
        };
        match value {
            Some(v) => sum += v,
            None => return 0.0,
        }
    }
    if avg {
        sum / unit_count(input)
    } else {
        sum
    }
}

fn rsi(input: &MetricInput, units: &[BarUnit]) -> f64 {
    let values = input.units(units).iter().filter_map(|u| u.rsi);
    match input.dir {
        Direction::Down => {
            let min = values.fold(f64::INFINITY, f64::min);
            if min.is_finite() {
                10000.0 / (min + FLOOR)
            } else {
                0.0
            }
        }
        Direction::Up => {
            let max = values.fold(f64::NEG_INFINITY, f64::max);
            if max.is_finite() {
                max
            } else {
                0.0
            }
        }
    }
}
