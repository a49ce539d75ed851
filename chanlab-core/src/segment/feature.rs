//! Three-element feature sequence used to find segment turning points.
//!
//! For an up segment the feature sequence is made of its down lines (and vice
//! versa). Lines are folded under containment into at most three elements; a
//! top (bottom) fractal on the middle element marks the end of an up (down)
//! segment.

use crate::domain::{Direction, FxType, MergeDir};
use crate::error::{ChanError, ChanResult};
use crate::line::Line;
use crate::merge::{AllowEqual, Combined};

#[derive(Debug, Clone)]
pub struct FeatureFx {
    dir: Direction,
    ele: [Option<Combined>; 3],
    /// Lines fed since the last clear, in order.
    lst: Vec<usize>,
    exclude_included: bool,
    /// Line whose confirmation the fractal depends on.
    last_evidence: Option<usize>,
    /// The middle element does not overlap the first one.
    gap: bool,
}

impl FeatureFx {
    /// A detector for segments of direction `dir`.
    pub fn new(dir: Direction, exclude_included: bool) -> Self {
        Self {
            dir,
            ele: [None, None, None],
            lst: Vec::new(),
            exclude_included,
            last_evidence: None,
            gap: false,
        }
    }

    pub fn has_second(&self) -> bool {
        self.ele[1].is_some()
    }

    pub fn clear(&mut self) {
        self.ele = [None, None, None];
        self.lst.clear();
        self.gap = false;
    }

    /// Feed one opposite-direction line. Returns true once a fractal formed.
    pub fn add<L: Line>(&mut self, lines: &[L], i: usize) -> ChanResult<bool> {
        let Some(line) = lines.get(i) else {
            return Err(ChanError::invariant(format!("feature line {i} does not exist")));
        };
        if line.dir() == self.dir {
            return Err(ChanError::invariant(format!(
                "line {i} runs with the segment and cannot join its feature sequence"
            )));
        }
        self.lst.push(i);
        if self.ele[0].is_none() {
            self.ele[0] = Some(Combined::new(i, line.high(), line.low(), self.dir));
            Ok(false)
        } else if self.ele[1].is_none() {
            self.treat_second(lines, i)
        } else if self.ele[2].is_none() {
            self.treat_third(lines, i)
        } else {
            Err(ChanError::invariant(format!(
                "feature sequence already complete when line {i} arrived"
            )))
        }
    }

    fn treat_second<L: Line>(&mut self, lines: &[L], i: usize) -> ChanResult<bool> {
        let line = &lines[i];
        let Some(first) = self.ele[0].as_mut() else {
            return Err(ChanError::invariant("feature sequence lost its first element"));
        };
        let merged = first.try_add(i, line.high(), line.low(), self.exclude_included, None)?;
        if merged == MergeDir::Combine {
            return Ok(false);
        }
        let second = Combined::new(i, line.high(), line.low(), self.dir);
        let retreats = match self.dir {
            Direction::Up => second.high() < first.high(),
            Direction::Down => second.low() > first.low(),
        };
        self.ele[1] = Some(second);
        if retreats {
            return self.reset(lines);
        }
        Ok(false)
    }

    fn treat_third<L: Line>(&mut self, lines: &[L], i: usize) -> ChanResult<bool> {
        let line = &lines[i];
        self.last_evidence = Some(i);
        let allow_equal = self.exclude_included.then(|| {
            if line.is_down() {
                AllowEqual::Top
            } else {
                AllowEqual::Bottom
            }
        });
        let Some(second) = self.ele[1].as_mut() else {
            return Err(ChanError::invariant("feature sequence lost its second element"));
        };
        let merged = second.try_add(i, line.high(), line.low(), false, allow_equal)?;
        let third_dir = match merged {
            MergeDir::Combine => return Ok(false),
            MergeDir::Up => Direction::Up,
            MergeDir::Down => Direction::Down,
            MergeDir::Included => {
                return Err(ChanError::invariant("feature merge reported exclusion"));
            }
        };
        self.ele[2] = Some(Combined::new(i, line.high(), line.low(), third_dir));
        if !self.actual_break(lines) {
            return self.reset(lines);
        }

        let (Some(first), Some(second), Some(third)) = (&self.ele[0], &self.ele[1], &self.ele[2])
        else {
            return Err(ChanError::invariant("feature sequence incomplete"));
        };
        let pre = (first.high(), first.low());
        let next = (third.high(), third.low());
        let mut second = second.clone();
        second.update_fx(pre, next, self.exclude_included, allow_equal);
        self.gap = match second.fx() {
            FxType::Top => pre.0 < second.low(),
            FxType::Bottom => pre.1 > second.high(),
            FxType::Unknown => false,
        };
        let is_fx = match self.dir {
            Direction::Up => second.fx() == FxType::Top,
            Direction::Down => second.fx() == FxType::Bottom,
        };
        self.ele[1] = Some(second);
        if is_fx {
            Ok(true)
        } else {
            self.reset(lines)
        }
    }

    /// Guard against fractals produced only by containment: the third element
    /// must clear the middle element's last line, or the line two after it
    /// must.
    fn actual_break<L: Line>(&mut self, lines: &[L]) -> bool {
        if !self.exclude_included {
            return true;
        }
        let (Some(second), Some(third)) = (&self.ele[1], &self.ele[2]) else {
            return false;
        };
        let tail = &lines[second.last()];
        let broke = match self.dir {
            Direction::Up => third.low() < tail.low(),
            Direction::Down => third.high() > tail.high(),
        };
        if broke {
            return true;
        }
        let j = third.first();
        let (Some(cur), Some(after)) = (lines.get(j), lines.get(j + 2)) else {
            return false;
        };
        if (cur.is_down() && after.low() < cur.low()) || (cur.is_up() && after.high() > cur.high()) {
            self.last_evidence = Some(j + 2);
            return true;
        }
        false
    }

    /// Start over after a failed fractal. With containment excluded every line
    /// after the first is replayed; otherwise the window slides by one element.
    fn reset<L: Line>(&mut self, lines: &[L]) -> ChanResult<bool> {
        let replay: Vec<usize> = self.lst.iter().skip(1).copied().collect();
        if self.exclude_included {
            self.clear();
            for i in replay {
                if self.add(lines, i)? {
                    return Ok(true);
                }
            }
        } else {
            let Some(second_begin) = self.ele[1].as_ref().map(|e| e.first()) else {
                return Err(ChanError::invariant("sliding feature window without a second element"));
            };
            let [_, second, third] = std::mem::take(&mut self.ele);
            self.ele = [second, third, None];
            self.gap = false;
            self.lst = replay.into_iter().filter(|&i| i >= second_begin).collect();
        }
        Ok(false)
    }

    /// Whether the fractal may end a confirmed segment.
    ///
    /// Without a gap it always may. With a gap a reverse fractal must follow
    /// the peak; `false` means none has formed yet, so the segment stays
    /// provisional.
    pub fn can_be_end<L: Line>(&self, lines: &[L]) -> ChanResult<bool> {
        if !self.gap {
            return Ok(true);
        }
        let end = self.peak_line(lines)?;
        Self::find_revert_fx(lines, end + 2)
    }

    fn find_revert_fx<L: Line>(lines: &[L], begin: usize) -> ChanResult<bool> {
        let Some(first) = lines.get(begin) else {
            return Ok(false);
        };
        let mut fx = FeatureFx::new(first.dir().reverse(), false);
        for i in (begin..lines.len()).step_by(2) {
            if fx.add(lines, i)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The segment's end line: the one just before the middle element's extreme.
    pub fn peak_line<L: Line>(&self, lines: &[L]) -> ChanResult<usize> {
        let Some(second) = &self.ele[1] else {
            return Err(ChanError::invariant("feature sequence has no middle element"));
        };
        let is_high = lines
            .get(second.first())
            .map(|l| l.is_down())
            .unwrap_or(false);
        let peak = second
            .peak_member(is_high, |m| (lines[m].high(), lines[m].low()))
            .ok_or_else(|| ChanError::invariant("middle feature element has no extreme line"))?;
        peak.checked_sub(1)
            .ok_or_else(|| ChanError::invariant("feature extreme on the first line"))
    }

    pub fn all_lines_sure<L: Line>(&self, lines: &[L]) -> bool {
        let evidence_sure = self
            .last_evidence
            .and_then(|i| lines.get(i))
            .map(|l| l.is_sure())
            .unwrap_or(false);
        evidence_sure
            && self
                .lst
                .iter()
                .all(|&i| lines.get(i).map(|l| l.is_sure()).unwrap_or(false))
    }

    /// Last line of the third element.
    pub fn tail(&self) -> Option<usize> {
        self.ele[2].as_ref().map(|e| e.last())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::testing::zigzag;

    #[test]
    fn top_fractal_on_down_lines() {
        // up segment with a clean top on line 5's high
        let lines = zigzag(&[10.0, 20.0, 15.0, 25.0, 20.0, 30.0, 22.0, 27.0, 18.0]);
        let mut fx = FeatureFx::new(Direction::Up, true);
        let mut found = None;
        for i in (1..lines.len()).step_by(2) {
            if fx.add(&lines, i).unwrap() {
                found = Some(i);
                break;
            }
        }
        assert_eq!(found, Some(7));
        assert_eq!(fx.peak_line(&lines).unwrap(), 4);
        assert!(fx.can_be_end(&lines).unwrap());
        assert!(fx.all_lines_sure(&lines));
        assert_eq!(fx.tail(), Some(7));
    }

    #[test]
    fn rejects_same_direction_line() {
        let lines = zigzag(&[10.0, 20.0, 15.0]);
        let mut fx = FeatureFx::new(Direction::Up, true);
        assert!(fx.add(&lines, 0).is_err());
    }

    #[test]
    fn unsure_evidence_blocks_confirmation() {
        let mut lines = zigzag(&[10.0, 20.0, 15.0, 25.0, 20.0, 30.0, 22.0, 27.0, 18.0]);
        lines[7].sure = false;
        let mut fx = FeatureFx::new(Direction::Up, true);
        for i in [1, 3, 5, 7] {
            fx.add(&lines, i).unwrap();
        }
        assert!(!fx.all_lines_sure(&lines));
    }
}
