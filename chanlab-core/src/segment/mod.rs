//! Segments: higher-order swings over a line sequence.
//!
//! The builders are generic over [`Line`], so the same code turns strokes
//! into segments and segments into segments-of-segments.

mod breakout;
mod chan;
pub mod feature;
mod one_plus_one;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{LeftMethod, SegAlgo, SegmentConfig};
use crate::domain::Direction;
use crate::error::{ChanError, ChanResult};
use crate::line::{find_peak_line, Line};
use crate::metric::{UnitRef, UnitSpan};
use crate::pivot::Pivot;

/// How a segment came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegReason {
    /// Ended by a feature-sequence fractal or a break rule.
    Normal,
    /// First segment cut at the highest line of the sequence.
    FirstHigh,
    FirstLow,
    /// First segment covering every line.
    FirstAll,
    /// Trailing segment cut at the highest line after the last segment.
    TailHigh,
    TailLow,
    /// Trailing segment forced because the tail already passed the last segment's end.
    TailHighForced,
    TailLowForced,
    /// Trailing segment ending one line before the last line.
    TailSameDir,
    /// Trailing segment ending on the last line.
    TailOppositeDir,
    /// Leading part of a first segment that was split at an earlier extreme.
    SplitFirst,
    /// Remainder of a split first segment.
    SplitSecond,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    idx: usize,
    start: usize,
    end: usize,
    dir: Direction,
    is_sure: bool,
    reason: SegReason,
    /// Indices into the pivot list built over the same lines, oldest first.
    pivots: Vec<usize>,
    /// Last line of the third feature element that confirmed this segment.
    feature_tail: Option<usize>,
    seg_idx: Option<usize>,
    parent_seg: Option<usize>,

    begin_val: f64,
    end_val: f64,
    high: f64,
    low: f64,
    begin_unit: UnitRef,
    end_unit: UnitRef,
    span: UnitSpan,
}

impl Segment {
    fn new<L: Line>(
        lines: &[L],
        idx: usize,
        start: usize,
        end: usize,
        is_sure: bool,
        dir: Option<Direction>,
        reason: SegReason,
    ) -> ChanResult<Self> {
        let (Some(first), Some(last)) = (lines.get(start), lines.get(end)) else {
            return Err(ChanError::invariant(format!(
                "segment {idx} spans missing lines {start}..={end}"
            )));
        };
        if end < start {
            return Err(ChanError::invariant(format!(
                "segment {idx} ends at line {end} before it starts at {start}"
            )));
        }
        if is_sure && start != 0 && first.dir() != last.dir() {
            return Err(ChanError::invariant(format!(
                "confirmed segment {idx} starts and ends on opposite lines ({start}, {end})"
            )));
        }
        let mut seg = Self {
            idx,
            start,
            end,
            dir: dir.unwrap_or_else(|| last.dir()),
            is_sure: is_sure && end - start >= 2,
            reason,
            pivots: Vec::new(),
            feature_tail: None,
            seg_idx: None,
            parent_seg: None,
            begin_val: 0.0,
            end_val: 0.0,
            high: 0.0,
            low: 0.0,
            begin_unit: UnitRef::default(),
            end_unit: UnitRef::default(),
            span: UnitSpan::default(),
        };
        seg.refresh(lines)?;
        Ok(seg)
    }

    /// Re-read the cached endpoint values from the member lines.
    pub(crate) fn refresh<L: Line>(&mut self, lines: &[L]) -> ChanResult<()> {
        let (Some(first), Some(last)) = (lines.get(self.start), lines.get(self.end)) else {
            return Err(ChanError::invariant(format!(
                "segment {} lost its lines {}..={}",
                self.idx, self.start, self.end
            )));
        };
        self.begin_val = first.begin_val();
        self.end_val = last.end_val();
        self.begin_unit = first.begin_unit();
        self.end_unit = last.end_unit();
        self.high = match self.dir {
            Direction::Up => self.end_unit.high,
            Direction::Down => self.begin_unit.high,
        };
        self.low = match self.dir {
            Direction::Down => self.end_unit.low,
            Direction::Up => self.begin_unit.low,
        };
        self.span = UnitSpan {
            first: first.span().first,
            last: last.span().last,
        };
        Ok(())
    }

    /// Value ordering check applied to confirmed segments.
    fn values_ordered(&self) -> bool {
        match self.dir {
            Direction::Down => self.begin_val >= self.end_val,
            Direction::Up => self.begin_val <= self.end_val,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn reason(&self) -> SegReason {
        self.reason
    }

    pub fn pivots(&self) -> &[usize] {
        &self.pivots
    }

    pub fn line_count(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains_line(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }

    pub(crate) fn clear_pivots(&mut self) {
        self.pivots.clear();
    }

    pub(crate) fn prepend_pivot(&mut self, pivot: usize) {
        self.pivots.insert(0, pivot);
    }

    pub fn first_multi_line_pivot<'a>(&self, pivots: &'a [Pivot]) -> Option<&'a Pivot> {
        self.pivots
            .iter()
            .filter_map(|&i| pivots.get(i))
            .find(|p| !p.is_one_line())
    }

    pub fn final_multi_line_pivot<'a>(&self, pivots: &'a [Pivot]) -> Option<&'a Pivot> {
        self.pivots
            .iter()
            .rev()
            .filter_map(|&i| pivots.get(i))
            .find(|p| !p.is_one_line())
    }

    pub fn multi_line_pivot_count(&self, pivots: &[Pivot]) -> usize {
        self.pivots
            .iter()
            .filter_map(|&i| pivots.get(i))
            .filter(|p| !p.is_one_line())
            .count()
    }
}

impl Line for Segment {
    fn idx(&self) -> usize {
        self.idx
    }

    fn dir(&self) -> Direction {
        self.dir
    }

    fn is_sure(&self) -> bool {
        self.is_sure
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn begin_val(&self) -> f64 {
        self.begin_val
    }

    fn end_val(&self) -> f64 {
        self.end_val
    }

    fn begin_unit(&self) -> UnitRef {
        self.begin_unit
    }

    fn end_unit(&self) -> UnitRef {
        self.end_unit
    }

    fn span(&self) -> UnitSpan {
        self.span
    }

    fn seg_idx(&self) -> Option<usize> {
        self.seg_idx
    }

    fn set_seg_idx(&mut self, idx: Option<usize>) {
        self.seg_idx = idx;
    }

    fn parent_seg(&self) -> Option<usize> {
        self.parent_seg
    }

    fn set_parent_seg(&mut self, idx: Option<usize>) {
        self.parent_seg = idx;
    }
}

/// Segments over one line sequence, rebuilt from the last confirmed segment
/// on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentList {
    segs: Vec<Segment>,
    config: SegmentConfig,
}

impl SegmentList {
    pub fn new(config: SegmentConfig) -> Self {
        Self {
            segs: Vec::new(),
            config,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segs
    }

    pub(crate) fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segs
    }

    pub fn len(&self) -> usize {
        self.segs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segs.last()
    }

    pub fn exist_sure_seg(&self) -> bool {
        self.segs.iter().any(|s| s.is_sure)
    }

    /// Latest confirmed segment, if any.
    pub fn last_sure(&self) -> Option<&Segment> {
        self.segs.iter().rev().find(|s| s.is_sure)
    }

    /// Rebuild segments over `lines` and tag every line with its segment.
    ///
    /// `last_sure_start` is the value returned by the previous call; lines
    /// before it keep their tags. Returns the start line of the latest
    /// confirmed segment.
    pub(crate) fn cal<L: Line>(
        &mut self,
        lines: &mut [L],
        last_sure_start: Option<usize>,
    ) -> ChanResult<Option<usize>> {
        self.update(lines)?;

        if self.segs.is_empty() {
            for line in lines.iter_mut() {
                line.set_seg_idx(Some(0));
            }
            return Ok(None);
        }

        let mut cur = self.segs.len() - 1;
        for i in (0..lines.len()).rev() {
            if let Some(start) = last_sure_start {
                if lines[i].seg_idx().is_some() && i < start {
                    break;
                }
            }
            let seg = &self.segs[cur];
            if i > seg.end {
                lines[i].set_seg_idx(Some(seg.idx + 1));
                continue;
            }
            if i < seg.start {
                cur = cur.checked_sub(1).ok_or_else(|| {
                    ChanError::invariant(format!("line {i} precedes the first segment"))
                })?;
            }
            lines[i].set_seg_idx(Some(self.segs[cur].idx));
        }

        Ok(self.last_sure().map(|s| s.start))
    }

    fn update<L: Line>(&mut self, lines: &mut [L]) -> ChanResult<()> {
        match self.config.algo {
            SegAlgo::Chan => chan::update(self, lines),
            SegAlgo::Break => breakout::update(self, lines),
            SegAlgo::OnePlusOne => one_plus_one::update(self, lines),
        }
    }

    /// Drop every segment and release the lines they held.
    fn reset<L: Line>(&mut self, lines: &mut [L]) {
        while let Some(seg) = self.segs.pop() {
            release_lines(lines, &seg);
        }
    }

    fn pop_last<L: Line>(&mut self, lines: &mut [L]) {
        if let Some(seg) = self.segs.pop() {
            debug!(seg = seg.idx, start = seg.start, end = seg.end, "segment retracted");
            release_lines(lines, &seg);
        }
    }

    /// Whether any line after the last segment goes beyond that segment's end line.
    fn tail_breaks_last<L: Line>(&self, lines: &[L]) -> bool {
        let Some(last) = self.segs.last() else {
            return false;
        };
        let Some(end_line) = lines.get(last.end) else {
            return false;
        };
        lines.iter().skip(last.end + 1).any(|l| {
            (end_line.is_up() && l.high() > end_line.high())
                || (end_line.is_down() && l.low() < end_line.low())
        })
    }

    fn collect_left<L: Line>(&mut self, lines: &mut [L]) -> ChanResult<()> {
        if self.segs.is_empty() {
            self.collect_first(lines)
        } else {
            self.collect_tail(lines)
        }
    }

    fn collect_first<L: Line>(&mut self, lines: &mut [L]) -> ChanResult<()> {
        if lines.len() < 3 {
            return Ok(());
        }
        match self.config.left_method {
            LeftMethod::Peak => {
                let high = lines.iter().map(|l| l.high()).fold(f64::NEG_INFINITY, f64::max);
                let low = lines.iter().map(|l| l.low()).fold(f64::INFINITY, f64::min);
                let origin = lines[0].begin_val();
                let is_high = (high - origin).abs() >= (low - origin).abs();
                let peak = find_peak_line(lines, 0..lines.len(), is_high).ok_or_else(|| {
                    ChanError::invariant("no extreme line among the first lines")
                })?;
                let (dir, reason) = if is_high {
                    (Direction::Up, SegReason::FirstHigh)
                } else {
                    (Direction::Down, SegReason::FirstLow)
                };
                self.add_new(lines, peak, false, Some(dir), false, reason)?;
                self.collect_left_as_seg(lines)
            }
            LeftMethod::All => {
                let last = lines.len() - 1;
                let dir = if lines[last].end_val() >= lines[0].begin_val() {
                    Direction::Up
                } else {
                    Direction::Down
                };
                self.add_new(lines, last, false, Some(dir), false, SegReason::FirstAll)?;
                Ok(())
            }
        }
    }

    fn collect_tail<L: Line>(&mut self, lines: &mut [L]) -> ChanResult<()> {
        let Some(last_end) = self.segs.last().map(|s| s.end) else {
            return Ok(());
        };
        let Some(last_line) = lines.len().checked_sub(1) else {
            return Ok(());
        };
        if last_line < last_end + 3 {
            return Ok(());
        }
        let end_dir = lines[last_end].dir();
        let end_val = lines[last_end].end_val();
        let tail_val = lines[last_line].end_val();

        if end_dir.is_down() && tail_val <= end_val {
            if let Some(peak) = find_peak_line(lines, last_end + 3..lines.len(), true) {
                self.add_new(lines, peak, false, Some(Direction::Up), true, SegReason::TailHighForced)?;
                self.collect_left(lines)?;
            }
            return Ok(());
        }
        if end_dir.is_up() && tail_val >= end_val {
            if let Some(peak) = find_peak_line(lines, last_end + 3..lines.len(), false) {
                self.add_new(lines, peak, false, Some(Direction::Down), true, SegReason::TailLowForced)?;
                self.collect_left(lines)?;
            }
            return Ok(());
        }
        match self.config.left_method {
            LeftMethod::All => self.collect_left_as_seg(lines),
            LeftMethod::Peak => self.collect_tail_peak(lines, last_end),
        }
    }

    fn collect_tail_peak<L: Line>(&mut self, lines: &mut [L], last_end: usize) -> ChanResult<()> {
        let is_high = lines[last_end].is_down();
        if let Some(peak) = find_peak_line(lines, last_end + 3..lines.len(), is_high) {
            if peak - last_end >= 3 {
                let (dir, reason) = if is_high {
                    (Direction::Up, SegReason::TailHigh)
                } else {
                    (Direction::Down, SegReason::TailLow)
                };
                self.add_new(lines, peak, false, Some(dir), true, reason)?;
            }
        }
        self.collect_left_as_seg(lines)
    }

    /// Wrap whatever follows the last segment into one provisional segment.
    fn collect_left_as_seg<L: Line>(&mut self, lines: &mut [L]) -> ChanResult<()> {
        let Some(last_end) = self.segs.last().map(|s| s.end) else {
            return Ok(());
        };
        if last_end + 1 >= lines.len() {
            return Ok(());
        }
        let last_line = lines.len() - 1;
        if lines[last_end].dir() == lines[last_line].dir() {
            self.add_new(lines, last_line - 1, false, None, true, SegReason::TailSameDir)?;
        } else {
            self.add_new(lines, last_line, false, None, true, SegReason::TailOppositeDir)?;
        }
        Ok(())
    }

    /// Append a segment from the line after the last segment through `end`.
    ///
    /// Returns false when the very first segment would be confirmed with its
    /// values in the wrong order; the caller then resumes after `end`.
    fn add_new<L: Line>(
        &mut self,
        lines: &mut [L],
        end: usize,
        is_sure: bool,
        dir: Option<Direction>,
        split_first: bool,
        reason: SegReason,
    ) -> ChanResult<bool> {
        if self.segs.is_empty() && split_first && end >= 3 {
            let is_high = lines[end].is_down();
            if let Some(peak) = find_peak_line(lines, (0..=end - 3).rev(), is_high) {
                let p = &lines[peak];
                let first = &lines[0];
                let beyond_first = match p.dir() {
                    Direction::Down => p.low() < first.low() || peak == 0,
                    Direction::Up => p.high() > first.high() || peak == 0,
                };
                if beyond_first {
                    let peak_dir = p.dir();
                    self.add_new(lines, peak, false, Some(peak_dir), true, SegReason::SplitFirst)?;
                    self.add_new(lines, end, false, None, true, SegReason::SplitSecond)?;
                    return Ok(true);
                }
            }
        }

        let start = self.segs.last().map_or(0, |s| s.end + 1);
        let seg = Segment::new(lines, self.segs.len(), start, end, is_sure, dir, reason)?;
        if seg.is_sure && !seg.values_ordered() {
            if self.segs.is_empty() {
                return Ok(false);
            }
            return Err(ChanError::invariant(format!(
                "confirmed {:?} segment {start}..={end} has begin {} and end {}",
                seg.dir, seg.begin_val, seg.end_val
            )));
        }
        debug!(
            seg = seg.idx,
            start,
            end,
            dir = ?seg.dir,
            sure = seg.is_sure,
            reason = ?seg.reason,
            "segment added"
        );
        for line in lines.iter_mut().take(end + 1).skip(start) {
            line.set_parent_seg(Some(seg.idx));
        }
        self.segs.push(seg);
        Ok(true)
    }
}

fn release_lines<L: Line>(lines: &mut [L], seg: &Segment) {
    for line in lines.iter_mut().take(seg.end + 1).skip(seg.start) {
        if line.parent_seg() == Some(seg.idx) {
            line.set_parent_seg(None);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::line::testing::{zigzag, TestLine};

    /// Up leg topping at 30 on line 4, then a falling tail.
    pub(crate) fn up_then_down() -> Vec<TestLine> {
        zigzag(&[
            10.0, 20.0, 15.0, 25.0, 20.0, 30.0, 22.0, 27.0, 18.0, 23.0, 14.0, 19.0, 12.0,
        ])
    }

    fn build(algo: SegAlgo, lines: &mut [TestLine]) -> SegmentList {
        let mut list = SegmentList::new(SegmentConfig {
            algo,
            ..SegmentConfig::default()
        });
        list.cal(lines, None).unwrap();
        list
    }

    fn shape(list: &SegmentList) -> Vec<(usize, usize, Direction, bool)> {
        list.segments()
            .iter()
            .map(|s| (s.start(), s.end(), s.dir(), s.is_sure()))
            .collect()
    }

    #[test]
    fn feature_fractal_confirms_first_segment() {
        let mut lines = up_then_down();
        let list = build(SegAlgo::Chan, &mut lines);
        assert_eq!(
            shape(&list),
            vec![
                (0, 4, Direction::Up, true),
                (5, 11, Direction::Down, false),
            ]
        );
        assert_eq!(list.segments()[1].reason(), SegReason::TailLow);
        assert_eq!(list.segments()[0].high(), 30.0);
        assert_eq!(list.segments()[0].low(), 10.0);
    }

    #[test]
    fn lines_are_tagged_with_their_segment() {
        let mut lines = up_then_down();
        let mut list = SegmentList::new(SegmentConfig::default());
        let last_sure = list.cal(&mut lines, None).unwrap();
        assert_eq!(last_sure, Some(0));
        for (i, line) in lines.iter().enumerate() {
            let expected = if i <= 4 { 0 } else { 1 };
            assert_eq!(line.seg_idx, Some(expected), "line {i}");
            assert_eq!(line.parent_seg, Some(expected), "line {i}");
        }
    }

    #[test]
    fn rebuilding_keeps_confirmed_segments() {
        let mut lines = up_then_down();
        let mut list = SegmentList::new(SegmentConfig::default());
        let last_sure = list.cal(&mut lines, None).unwrap();
        let first = list.segments()[0].clone();
        list.cal(&mut lines, last_sure).unwrap();
        assert_eq!(list.segments()[0], first);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn too_few_lines_make_no_segment() {
        let mut lines = zigzag(&[10.0, 20.0, 15.0]);
        let list = build(SegAlgo::Chan, &mut lines);
        assert!(list.is_empty());
        assert!(lines.iter().all(|l| l.seg_idx == Some(0)));
    }

    #[test]
    fn break_algorithm_agrees_on_clean_swing() {
        let mut lines = up_then_down();
        let list = build(SegAlgo::Break, &mut lines);
        assert_eq!(
            shape(&list),
            vec![
                (0, 4, Direction::Up, true),
                (5, 11, Direction::Down, false),
            ]
        );
    }

    #[test]
    fn one_plus_one_cuts_on_pullback() {
        let mut lines = up_then_down();
        let list = build(SegAlgo::OnePlusOne, &mut lines);
        assert_eq!(
            shape(&list),
            vec![
                (0, 1, Direction::Down, false),
                (2, 4, Direction::Up, true),
                (5, 11, Direction::Down, false),
            ]
        );
    }

    #[test]
    fn all_method_collects_whole_first_sequence() {
        let mut lines = zigzag(&[10.0, 20.0, 15.0, 19.0]);
        let mut list = SegmentList::new(SegmentConfig {
            left_method: LeftMethod::All,
            ..SegmentConfig::default()
        });
        list.cal(&mut lines, None).unwrap();
        assert_eq!(shape(&list), vec![(0, 2, Direction::Up, false)]);
        assert_eq!(list.segments()[0].reason(), SegReason::FirstAll);
    }
}
