//! Raw units and the merged-bar sequence of one level.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::FxCheck;
use crate::domain::{has_overlap, Bar, Direction, FxType, MergeDir};
use crate::error::{ChanError, ChanResult};
use crate::indicators::MacdPoint;
use crate::metric::{UnitRef, UnitSpan};

use super::combiner::Combined;

/// A raw bar after it entered a level, with its streaming indicators and
/// cross-level links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarUnit {
    pub idx: usize,
    pub bar: Bar,
    pub macd: MacdPoint,
    pub rsi: Option<f64>,
    /// Index of the merged bar holding this unit.
    pub merged: usize,
    /// Unit index in the next coarser level.
    pub parent: Option<usize>,
    /// Unit indices in the next finer level.
    pub children: Vec<usize>,
}

impl BarUnit {
    pub fn new(idx: usize, bar: Bar) -> Self {
        Self {
            idx,
            bar,
            macd: MacdPoint::default(),
            rsi: None,
            merged: 0,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn time(&self) -> NaiveDateTime {
        self.bar.time
    }

    fn unit_ref(&self) -> UnitRef {
        UnitRef {
            idx: self.idx,
            high: self.bar.high,
            low: self.bar.low,
        }
    }
}

/// A run of raw units folded together under containment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedBar {
    pub idx: usize,
    pub time_begin: NaiveDateTime,
    pub time_end: NaiveDateTime,
    inner: Combined,
}

impl MergedBar {
    fn new(idx: usize, unit: &BarUnit, dir: Direction) -> Self {
        Self {
            idx,
            time_begin: unit.time(),
            time_end: unit.time(),
            inner: Combined::new(unit.idx, unit.bar.high, unit.bar.low, dir),
        }
    }

    pub fn high(&self) -> f64 {
        self.inner.high()
    }

    pub fn low(&self) -> f64 {
        self.inner.low()
    }

    pub fn dir(&self) -> Direction {
        self.inner.dir()
    }

    pub fn fx(&self) -> FxType {
        self.inner.fx()
    }

    /// Constituent unit indices, oldest first.
    pub fn units(&self) -> &[usize] {
        self.inner.members()
    }

    pub fn first_unit(&self) -> usize {
        self.inner.first()
    }

    pub fn last_unit(&self) -> usize {
        self.inner.last()
    }
}

/// What happened to the merged-bar sequence when a unit was appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// The unit was folded into the newest merged bar.
    Merged,
    /// The unit opened a new merged bar.
    NewBar,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    units: Vec<BarUnit>,
    bars: Vec<MergedBar>,
}

impl BarSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> &[BarUnit] {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut [BarUnit] {
        &mut self.units
    }

    pub fn bars(&self) -> &[MergedBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last_unit(&self) -> Option<&BarUnit> {
        self.units.last()
    }

    fn bar(&self, idx: usize) -> ChanResult<&MergedBar> {
        self.bars
            .get(idx)
            .ok_or_else(|| ChanError::invariant(format!("merged bar {idx} does not exist")))
    }

    /// Append one unit. The unit's `idx` and `merged` fields are assigned here.
    ///
    /// When a new merged bar opens, the previous one is classified as a fractal
    /// against its two neighbours.
    pub fn push(&mut self, mut unit: BarUnit) -> ChanResult<Appended> {
        unit.idx = self.units.len();
        let Some(last) = self.bars.last_mut() else {
            unit.merged = 0;
            self.bars.push(MergedBar::new(0, &unit, Direction::Up));
            self.units.push(unit);
            return Ok(Appended::NewBar);
        };

        let dir = last
            .inner
            .try_add(unit.idx, unit.bar.high, unit.bar.low, false, None)?;
        let dir = match dir {
            MergeDir::Combine => {
                last.time_end = unit.time();
                unit.merged = last.idx;
                self.units.push(unit);
                return Ok(Appended::Merged);
            }
            MergeDir::Up => Direction::Up,
            MergeDir::Down => Direction::Down,
            MergeDir::Included => {
                return Err(ChanError::invariant("bar merge reported exclusion"));
            }
        };

        let idx = self.bars.len();
        unit.merged = idx;
        self.bars.push(MergedBar::new(idx, &unit, dir));
        self.units.push(unit);

        if idx >= 2 {
            let pre = (self.bars[idx - 2].high(), self.bars[idx - 2].low());
            let next = (self.bars[idx].high(), self.bars[idx].low());
            self.bars[idx - 1].inner.update_fx(pre, next, false, None);
        }
        Ok(Appended::NewBar)
    }

    /// Unit carrying the merged bar's high (or low), latest first.
    pub fn peak_unit(&self, merged: usize, is_high: bool) -> ChanResult<UnitRef> {
        let bar = self.bar(merged)?;
        let idx = bar
            .inner
            .peak_member(is_high, |u| (self.units[u].bar.high, self.units[u].bar.low))
            .ok_or_else(|| {
                ChanError::invariant(format!("merged bar {merged} has no unit at its extreme"))
            })?;
        Ok(self.units[idx].unit_ref())
    }

    /// Raw units covered from the first unit of `begin` to the last unit of `end`.
    pub fn span(&self, begin: usize, end: usize) -> ChanResult<UnitSpan> {
        Ok(UnitSpan {
            first: self.bar(begin)?.first_unit(),
            last: self.bar(end)?.last_unit(),
        })
    }

    fn unit_band(&self, merged: &MergedBar) -> (f64, f64) {
        merged.units().iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), &u| (lo.min(self.units[u].bar.low), hi.max(self.units[u].bar.high)),
        )
    }

    /// True when the raw ranges of `merged` and the next merged bar do not touch.
    pub fn has_gap_with_next(&self, merged: usize) -> bool {
        let (Some(cur), Some(next)) = (self.bars.get(merged), self.bars.get(merged + 1)) else {
            return false;
        };
        let (l1, h1) = self.unit_band(cur);
        let (l2, h2) = self.unit_band(next);
        !has_overlap(l1, h1, l2, h2, true)
    }

    /// Whether the fractal at `begin` and the candidate end at `end` are far
    /// enough apart in price under `method`.
    ///
    /// With `for_virtual`, `end` need not be a confirmed fractal and the bar
    /// after it is not consulted.
    pub fn check_fx_valid(
        &self,
        begin: usize,
        end: usize,
        method: FxCheck,
        for_virtual: bool,
    ) -> ChanResult<bool> {
        if end <= begin || begin == 0 {
            return Err(ChanError::invariant(format!(
                "fractal check between merged bars {begin} and {end}"
            )));
        }
        let cur = self.bar(begin)?;
        let cur_pre = self.bar(begin - 1)?;
        let cur_next = self.bar(begin + 1)?;
        let item = self.bar(end)?;
        let item_pre = self.bar(end - 1)?;

        match cur.fx() {
            FxType::Top => {
                if for_virtual && item.dir() != Direction::Down {
                    return Ok(false);
                }
                let (item_high, cur_low) = match method {
                    FxCheck::Half => (
                        item_pre.high().max(item.high()),
                        cur.low().min(cur_next.low()),
                    ),
                    FxCheck::Loss => (item.high(), cur.low()),
                    FxCheck::Strict | FxCheck::Totally => {
                        let mut h = item_pre.high().max(item.high());
                        if !for_virtual {
                            h = h.max(self.bar(end + 1)?.high());
                        }
                        (h, cur_pre.low().min(cur.low()).min(cur_next.low()))
                    }
                };
                Ok(if method == FxCheck::Totally {
                    cur.low() > item_high
                } else {
                    cur.high() > item_high && item.low() < cur_low
                })
            }
            FxType::Bottom => {
                if for_virtual && item.dir() != Direction::Up {
                    return Ok(false);
                }
                let (item_low, cur_high) = match method {
                    FxCheck::Half => (
                        item_pre.low().min(item.low()),
                        cur.high().max(cur_next.high()),
                    ),
                    FxCheck::Loss => (item.low(), cur.high()),
                    FxCheck::Strict | FxCheck::Totally => {
                        let mut l = item_pre.low().min(item.low());
                        if !for_virtual {
                            l = l.min(self.bar(end + 1)?.low());
                        }
                        (l, cur_pre.high().max(cur.high()).max(cur_next.high()))
                    }
                };
                Ok(if method == FxCheck::Totally {
                    cur.high() < item_low
                } else {
                    cur.low() < item_low && item.high() > cur_high
                })
            }
            FxType::Unknown => Err(ChanError::invariant(format!(
                "merged bar {begin} is not a fractal"
            ))),
        }
    }

    /// No merged bar strictly between the fractal at `last_end` and `cur_end`
    /// goes beyond `cur_end`'s extreme.
    pub fn end_is_peak(&self, last_end: usize, cur_end: usize) -> bool {
        let Some(anchor) = self.bars.get(last_end) else {
            return true;
        };
        let Some(end) = self.bars.get(cur_end) else {
            return true;
        };
        let between = self.bars.get(last_end + 1..cur_end).unwrap_or(&[]);
        match anchor.fx() {
            FxType::Bottom => between.iter().all(|b| b.high() <= end.high()),
            FxType::Top => between.iter().all(|b| b.low() >= end.low()),
            FxType::Unknown => true,
        }
    }
}
