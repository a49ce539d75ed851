//! Pivots: price bands where consecutive lines overlap.

pub mod list;

pub use list::PivotList;

use serde::{Deserialize, Serialize};

use crate::config::{CombineMode, PointConfig};
use crate::domain::has_overlap;
use crate::line::Line;
use crate::merge::BarUnit;
use crate::metric::UnitRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    is_sure: bool,
    begin_line: usize,
    end_line: usize,
    begin_unit: UnitRef,
    end_unit: UnitRef,

    /// Body band: the overlap of the lines that formed the pivot.
    low: f64,
    high: f64,
    mid: f64,
    /// Extremes reached by any member line.
    peak_low: f64,
    peak_high: f64,

    line_in: Option<usize>,
    line_out: Option<usize>,
    /// Pivots folded into this one, oldest first. Empty unless combined.
    sub_pivots: Vec<Pivot>,
}

impl Pivot {
    /// Build a pivot from the consecutive lines `members`, which must be non-empty.
    pub(crate) fn new<L: Line>(lines: &[L], members: &[usize], is_sure: bool) -> Option<Self> {
        let (&first, &last) = (members.first()?, members.last()?);
        let (low, high) = body_of(lines, members);
        let mut pivot = Self {
            is_sure,
            begin_line: first,
            end_line: last,
            begin_unit: lines[first].begin_unit(),
            end_unit: lines[last].end_unit(),
            low,
            high,
            mid: (low + high) / 2.0,
            peak_low: f64::INFINITY,
            peak_high: f64::NEG_INFINITY,
            line_in: None,
            line_out: None,
            sub_pivots: Vec::new(),
        };
        for &i in members {
            pivot.extend_to(lines, i);
        }
        Some(pivot)
    }

    pub fn is_sure(&self) -> bool {
        self.is_sure
    }

    pub fn begin_line(&self) -> usize {
        self.begin_line
    }

    pub fn end_line(&self) -> usize {
        self.end_line
    }

    pub fn begin_unit(&self) -> UnitRef {
        self.begin_unit
    }

    pub fn end_unit(&self) -> UnitRef {
        self.end_unit
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    /// Midpoint of the body when the pivot was formed. Combining widens
    /// the body but keeps this value.
    pub fn mid(&self) -> f64 {
        self.mid
    }

    pub fn peak_low(&self) -> f64 {
        self.peak_low
    }

    pub fn peak_high(&self) -> f64 {
        self.peak_high
    }

    /// Line right before the first member.
    pub fn line_in(&self) -> Option<usize> {
        self.line_in
    }

    /// Line right after the last member, once it exists.
    pub fn line_out(&self) -> Option<usize> {
        self.line_out
    }

    pub fn sub_pivots(&self) -> &[Pivot] {
        &self.sub_pivots
    }

    pub fn members(&self) -> std::ops::RangeInclusive<usize> {
        self.begin_line..=self.end_line
    }

    pub fn is_one_line(&self) -> bool {
        self.begin_line == self.end_line
    }

    /// Whether the pivot starts inside the segment spanning lines `start..=end`.
    pub fn starts_within(&self, start: usize, end: usize) -> bool {
        start <= self.begin_line && self.begin_line <= end
    }

    pub fn in_range<L: Line>(&self, line: &L) -> bool {
        has_overlap(self.low, self.high, line.low(), line.high(), false)
    }

    fn extend_to<L: Line>(&mut self, lines: &[L], i: usize) {
        let line = &lines[i];
        self.end_line = i;
        self.end_unit = line.end_unit();
        self.peak_low = self.peak_low.min(line.low());
        self.peak_high = self.peak_high.max(line.high());
    }

    fn set_body(&mut self, low: f64, high: f64) {
        self.low = low;
        self.high = high;
        self.mid = (low + high) / 2.0;
    }

    /// Append line `i` if it overlaps the body. A one-line pivot re-derives
    /// its body from both lines.
    pub(crate) fn try_add_to_end<L: Line>(&mut self, lines: &[L], i: usize) -> bool {
        if !self.in_range(&lines[i]) {
            return false;
        }
        if self.is_one_line() {
            let (low, high) = body_of(lines, &[self.begin_line, i]);
            self.set_body(low, high);
        }
        self.extend_to(lines, i);
        true
    }

    /// Fold `other` into `self` when both start in the same segment and the
    /// chosen bands overlap. One-line pivots are never folded.
    pub(crate) fn combine<L: Line>(&mut self, other: &Pivot, lines: &[L], mode: CombineMode) -> bool {
        if other.is_one_line() {
            return false;
        }
        if lines[self.begin_line].seg_idx() != lines[other.begin_line].seg_idx() {
            return false;
        }
        let overlaps = match mode {
            CombineMode::Zs => has_overlap(self.low, self.high, other.low, other.high, true),
            CombineMode::Peak => {
                has_overlap(self.peak_low, self.peak_high, other.peak_low, other.peak_high, false)
            }
        };
        if overlaps {
            self.absorb(other);
        }
        overlaps
    }

    fn absorb(&mut self, other: &Pivot) {
        if self.sub_pivots.is_empty() {
            let mut own = self.clone();
            own.sub_pivots.clear();
            self.sub_pivots.push(own);
        }
        self.sub_pivots.push(other.clone());
        self.low = self.low.min(other.low);
        self.high = self.high.max(other.high);
        self.peak_low = self.peak_low.min(other.peak_low);
        self.peak_high = self.peak_high.max(other.peak_high);
        self.end_line = other.end_line;
        self.end_unit = other.end_unit;
        self.line_out = other.line_out;
    }

    /// Re-link the entering and exiting lines, for this pivot and its sub-pivots.
    pub(crate) fn link<L: Line>(&mut self, lines: &[L]) {
        self.line_in = self.begin_line.checked_sub(1);
        self.line_out = Some(self.end_line + 1).filter(|&i| i < lines.len());
        for sub in &mut self.sub_pivots {
            sub.link(lines);
        }
    }

    /// Whether `line` leaves the body on its own side.
    pub fn is_broken_by<L: Line>(&self, line: &L) -> bool {
        (line.is_down() && line.low() < self.low) || (line.is_up() && line.high() > self.high)
    }

    /// Whether the exit line is the extreme of all members up to `end_line`.
    pub fn out_line_is_peak<L: Line>(&self, lines: &[L], end_line: usize) -> bool {
        let Some(out) = self.line_out.and_then(|i| lines.get(i)) else {
            return false;
        };
        self.members()
            .take_while(|&i| i <= end_line)
            .filter_map(|i| lines.get(i))
            .all(|l| {
                !((out.is_down() && l.low() < out.low()) || (out.is_up() && l.high() > out.high()))
            })
    }

    /// Divergence between the entering line and `out` (the exit line when
    /// `None`). Returns whether it holds and the exit/entry metric ratio; the
    /// ratio is `None` when `out` does not break the body.
    pub fn divergence<L: Line>(
        &self,
        lines: &[L],
        units: &[BarUnit],
        config: &PointConfig,
        out: Option<usize>,
    ) -> (bool, Option<f64>) {
        let (Some(out), Some(line_in)) = (
            out.or(self.line_out).and_then(|i| lines.get(i)),
            self.line_in.and_then(|i| lines.get(i)),
        ) else {
            return (false, None);
        };
        if !self.is_broken_by(out) {
            return (false, None);
        }
        let in_metric = line_in.metric(units, config.metric, false);
        let out_metric = out.metric(units, config.metric, true);
        let rate = out_metric / in_metric;
        if config.divergence_rate > 100.0 {
            (true, Some(rate))
        } else {
            (out_metric <= config.divergence_rate * in_metric, Some(rate))
        }
    }
}

/// Intersection of the members' ranges as `(max low, min high)`.
fn body_of<L: Line>(lines: &[L], members: &[usize]) -> (f64, f64) {
    members.iter().fold((f64::NEG_INFINITY, f64::INFINITY), |(lo, hi), &i| {
        (lo.max(lines[i].low()), hi.min(lines[i].high()))
    })
}
