//! Pivot construction over a line sequence and its segments.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::{PivotAlgo, PivotConfig};
use crate::domain::Direction;
use crate::error::{ChanError, ChanResult};
use crate::line::Line;
use crate::segment::Segment;

use super::Pivot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotList {
    pivots: Vec<Pivot>,
    config: PivotConfig,
    /// Candidate lines not yet part of a pivot.
    free: Vec<usize>,
    /// Start line of the latest confirmed segment at the previous pass.
    last_sure_pos: Option<usize>,
    last_seg_idx: usize,
}

impl PivotList {
    pub fn new(config: PivotConfig) -> Self {
        Self {
            pivots: Vec::new(),
            config,
            free: Vec::new(),
            last_sure_pos: None,
            last_seg_idx: 0,
        }
    }

    pub fn pivots(&self) -> &[Pivot] {
        &self.pivots
    }

    pub fn len(&self) -> usize {
        self.pivots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pivots.is_empty()
    }

    pub fn last(&self) -> Option<&Pivot> {
        self.pivots.last()
    }

    /// Rebuild every pivot that starts at or after the last confirmed segment.
    pub(crate) fn cal<L: Line>(&mut self, lines: &[L], segs: &[Segment]) {
        while self
            .pivots
            .last()
            .is_some_and(|p| self.last_sure_pos.map_or(true, |pos| p.begin_line() >= pos))
        {
            self.pivots.pop();
        }

        match self.config.algo {
            PivotAlgo::Normal => {
                for seg in segs.iter().skip(self.last_seg_idx) {
                    if !self.seg_need_cal(seg) {
                        continue;
                    }
                    self.free.clear();
                    self.add_from_range(lines, segs, seg.start()..seg.end() + 1, seg.dir(), seg.is_sure());
                }
                if let Some(last) = segs.last() {
                    self.free.clear();
                    self.add_from_range(lines, segs, last.end() + 1..lines.len(), last.dir().reverse(), false);
                }
            }
            PivotAlgo::OverSeg => {
                self.free.clear();
                let begin = self.pivots.last().map_or(0, |p| p.end_line() + 1);
                for i in begin..lines.len() {
                    self.update_over_seg(lines, segs, i);
                }
            }
            PivotAlgo::Auto => {
                let mut sure_seg_appear = false;
                let exist_sure_seg = segs.iter().any(|s| s.is_sure());
                for seg in segs.iter().skip(self.last_seg_idx) {
                    if seg.is_sure() {
                        sure_seg_appear = true;
                    }
                    if !self.seg_need_cal(seg) {
                        continue;
                    }
                    self.free.clear();
                    if seg.is_sure() || (!sure_seg_appear && exist_sure_seg) {
                        self.add_from_range(lines, segs, seg.start()..seg.end() + 1, seg.dir(), seg.is_sure());
                    } else {
                        for i in seg.start()..lines.len() {
                            self.update_over_seg(lines, segs, i);
                        }
                        break;
                    }
                }
            }
        }

        match segs.iter().rev().find(|s| s.is_sure()) {
            Some(seg) => {
                self.last_sure_pos = Some(seg.start());
                self.last_seg_idx = seg.idx();
            }
            None => {
                self.last_sure_pos = None;
                self.last_seg_idx = 0;
            }
        }
        trace!(pivots = self.pivots.len(), "pivots updated");
    }

    fn seg_need_cal(&self, seg: &Segment) -> bool {
        self.last_sure_pos.map_or(true, |pos| seg.start() >= pos)
    }

    /// Attach pivots to the segments they start in and re-link every pivot's
    /// entering and exiting lines.
    pub(crate) fn assign_to_segments<L: Line>(
        &mut self,
        lines: &[L],
        segs: &mut [Segment],
    ) -> ChanResult<()> {
        for seg in segs.iter_mut().rev() {
            seg.clear_pivots();
            let seg_begin = seg.begin_unit().idx;
            for (pi, pivot) in self.pivots.iter_mut().enumerate().rev() {
                if pivot.end_unit().idx < seg_begin {
                    break;
                }
                if pivot.starts_within(seg.start(), seg.end()) {
                    seg.prepend_pivot(pi);
                }
                if pivot.begin_line() == 0 {
                    return Err(ChanError::invariant("pivot starts on the first line"));
                }
                pivot.link(lines);
            }
        }
        Ok(())
    }

    fn add_from_range<L: Line>(
        &mut self,
        lines: &[L],
        segs: &[Segment],
        range: std::ops::Range<usize>,
        seg_dir: Direction,
        is_sure: bool,
    ) {
        let mut first = true;
        for i in range {
            if lines[i].dir() == seg_dir {
                continue;
            }
            if first {
                self.add_to_free(lines, segs, i, is_sure, false);
                first = false;
            } else {
                self.update(lines, segs, i, is_sure);
            }
        }
    }

    fn update<L: Line>(&mut self, lines: &[L], segs: &[Segment], i: usize, is_sure: bool) {
        if self.free.is_empty() && self.try_add_to_end(lines, i) {
            self.try_combine(lines);
            return;
        }
        self.add_to_free(lines, segs, i, is_sure, false);
    }

    fn try_add_to_end<L: Line>(&mut self, lines: &[L], i: usize) -> bool {
        self.pivots
            .last_mut()
            .is_some_and(|p| p.try_add_to_end(lines, i))
    }

    fn add_to_free<L: Line>(
        &mut self,
        lines: &[L],
        segs: &[Segment],
        i: usize,
        is_sure: bool,
        over_seg: bool,
    ) {
        if self.free.last() == Some(&i) {
            self.free.pop();
        }
        self.free.push(i);
        let Some(pivot) = self.try_construct(lines, segs, is_sure, over_seg) else {
            return;
        };
        if pivot.begin_line() > 0 {
            self.pivots.push(pivot);
            self.free.clear();
            self.try_combine(lines);
        }
    }

    fn try_construct<L: Line>(
        &self,
        lines: &[L],
        segs: &[Segment],
        is_sure: bool,
        over_seg: bool,
    ) -> Option<Pivot> {
        let members: &[usize] = if over_seg {
            if self.free.len() < 3 {
                return None;
            }
            let tail = &self.free[self.free.len() - 3..];
            let first = &lines[tail[0]];
            let runs_with_segment = first
                .parent_seg()
                .and_then(|p| segs.get(p))
                .is_some_and(|s| s.dir() == first.dir());
            if runs_with_segment {
                return None;
            }
            tail
        } else if self.config.one_line_pivot {
            &self.free
        } else {
            if self.free.len() < 2 {
                return None;
            }
            &self.free[self.free.len() - 2..]
        };

        let min_high = members.iter().map(|&i| lines[i].high()).fold(f64::INFINITY, f64::min);
        let max_low = members.iter().map(|&i| lines[i].low()).fold(f64::NEG_INFINITY, f64::max);
        if min_high > max_low {
            Pivot::new(lines, members, is_sure)
        } else {
            None
        }
    }

    /// Extend or open pivots along the raw line sequence, ignoring segments.
    fn update_over_seg<L: Line>(&mut self, lines: &[L], segs: &[Segment], i: usize) {
        if self.free.is_empty() {
            if let Some(last) = self.pivots.last_mut() {
                let Some(next) = lines.get(i + 1) else {
                    return;
                };
                if i <= last.end_line() + 1 && last.in_range(next) && last.try_add_to_end(lines, i) {
                    return;
                }
                if last.in_range(&lines[i]) && i <= last.end_line() + 1 {
                    return;
                }
            }
        }
        self.add_to_free(lines, segs, i, lines[i].is_sure(), true);
    }

    fn try_combine<L: Line>(&mut self, lines: &[L]) {
        if !self.config.need_combine {
            return;
        }
        while self.pivots.len() >= 2 {
            let Some(last) = self.pivots.pop() else {
                break;
            };
            let Some(prev) = self.pivots.last_mut() else {
                break;
            };
            if !prev.combine(&last, lines, self.config.combine_mode) {
                self.pivots.push(last);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use crate::line::testing::zigzag;
    use crate::segment::tests::up_then_down;
    use crate::segment::SegmentList;

    #[test]
    fn normal_pivots_follow_segments() {
        let mut lines = up_then_down();
        let mut segs = SegmentList::new(SegmentConfig::default());
        segs.cal(&mut lines, None).unwrap();

        let mut pivots = PivotList::new(PivotConfig::default());
        pivots.cal(&lines, segs.segments());
        pivots.assign_to_segments(&lines, segs.segments_mut()).unwrap();

        assert_eq!(pivots.len(), 1);
        let p = &pivots.pivots()[0];
        assert_eq!((p.begin_line(), p.end_line()), (6, 8));
        assert_eq!((p.low(), p.high()), (22.0, 23.0));
        assert_eq!((p.line_in(), p.line_out()), (Some(5), Some(9)));
        assert!(!p.is_sure());
        assert!(segs.segments()[0].pivots().is_empty());
        assert_eq!(segs.segments()[1].pivots(), &[0]);
    }

    #[test]
    fn recompute_is_stable() {
        let mut lines = up_then_down();
        let mut segs = SegmentList::new(SegmentConfig::default());
        segs.cal(&mut lines, None).unwrap();
        let mut pivots = PivotList::new(PivotConfig::default());
        pivots.cal(&lines, segs.segments());
        pivots.assign_to_segments(&lines, segs.segments_mut()).unwrap();
        let first = pivots.pivots().to_vec();

        pivots.cal(&lines, segs.segments());
        pivots.assign_to_segments(&lines, segs.segments_mut()).unwrap();
        assert_eq!(pivots.pivots(), first.as_slice());
    }

    #[test]
    fn over_segment_pivot_uses_three_lines() {
        let lines = zigzag(&[10.0, 15.0, 11.0, 14.0, 12.0, 20.0]);
        let mut pivots = PivotList::new(PivotConfig {
            algo: PivotAlgo::OverSeg,
            ..PivotConfig::default()
        });
        pivots.cal(&lines, &[]);
        assert_eq!(pivots.len(), 1);
        let p = &pivots.pivots()[0];
        assert_eq!((p.begin_line(), p.end_line()), (1, 3));
        assert_eq!((p.low(), p.high()), (12.0, 14.0));
        assert_eq!((p.peak_low(), p.peak_high()), (11.0, 15.0));
    }

    #[test]
    fn pivot_on_first_line_is_discarded() {
        // lines 0..=2 overlap, but a pivot needs a line before it
        let lines = zigzag(&[10.0, 15.0, 11.0, 14.0]);
        let mut pivots = PivotList::new(PivotConfig {
            algo: PivotAlgo::OverSeg,
            ..PivotConfig::default()
        });
        pivots.cal(&lines, &[]);
        assert!(pivots.is_empty());
    }

    #[test]
    fn pivot_confirms_with_its_last_member() {
        let config = PivotConfig {
            algo: PivotAlgo::OverSeg,
            ..PivotConfig::default()
        };
        // down 14->10 leads in, then up 10->15, down 15->11, up 11->16
        let mut lines = zigzag(&[14.0, 10.0, 15.0, 11.0, 16.0]);
        lines[3].sure = false;
        let mut pivots = PivotList::new(config.clone());
        pivots.cal(&lines, &[]);
        assert_eq!(pivots.len(), 1);
        assert!(!pivots.pivots()[0].is_sure());

        // a fourth stroke leaves the body and confirms the third
        let lines = zigzag(&[14.0, 10.0, 15.0, 11.0, 16.0, 9.0]);
        pivots.cal(&lines, &[]);
        assert_eq!(pivots.len(), 1);
        let p = &pivots.pivots()[0];
        assert!(p.is_sure());
        assert_eq!((p.begin_line(), p.end_line()), (1, 3));
        assert_eq!((p.low(), p.high()), (11.0, 15.0));
        assert!(p.is_broken_by(&lines[4]));
    }
}
