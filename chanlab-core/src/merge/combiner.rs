//! Containment merging shared by merged bars and feature-sequence elements.
//!
//! A [`Combined`] element folds a run of items (raw bars, or lines) whose
//! price ranges contain one another. Items are referenced by index; the
//! element only keeps the merged band and the member indices.

use serde::{Deserialize, Serialize};

use crate::domain::{Direction, FxType, MergeDir};
use crate::error::{ChanError, ChanResult};

/// Tie-break for a candidate that shares one extreme with the open element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowEqual {
    /// Equal highs with a lower low count as a downward step.
    Top,
    /// Equal lows with a higher high count as an upward step.
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combined {
    high: f64,
    low: f64,
    dir: Direction,
    fx: FxType,
    members: Vec<usize>,
}

impl Combined {
    pub fn new(idx: usize, high: f64, low: f64, dir: Direction) -> Self {
        Self {
            high,
            low,
            dir,
            fx: FxType::Unknown,
            members: vec![idx],
        }
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn dir(&self) -> Direction {
        self.dir
    }

    pub fn fx(&self) -> FxType {
        self.fx
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn first(&self) -> usize {
        self.members[0]
    }

    pub fn last(&self) -> usize {
        self.members[self.members.len() - 1]
    }

    /// Classify a candidate range against this element without mutating it.
    pub fn test_combine(
        &self,
        high: f64,
        low: f64,
        exclude_included: bool,
        allow_equal: Option<AllowEqual>,
    ) -> ChanResult<MergeDir> {
        if self.high >= high && self.low <= low {
            return Ok(MergeDir::Combine);
        }
        if self.high <= high && self.low >= low {
            return Ok(match allow_equal {
                Some(AllowEqual::Top) if self.high == high && self.low > low => MergeDir::Down,
                Some(AllowEqual::Bottom) if self.low == low && self.high < high => MergeDir::Up,
                _ if exclude_included => MergeDir::Included,
                _ => MergeDir::Combine,
            });
        }
        if self.high > high && self.low > low {
            return Ok(MergeDir::Down);
        }
        if self.high < high && self.low < low {
            return Ok(MergeDir::Up);
        }
        Err(ChanError::invariant(format!(
            "unclassifiable overlap: [{}, {}] vs [{}, {}]",
            self.low, self.high, low, high
        )))
    }

    /// Merge the candidate if contained. Returns the classification either way.
    ///
    /// A one-price candidate touching the element's extreme (a limit-locked
    /// bar) does not move the band.
    pub fn try_add(
        &mut self,
        idx: usize,
        high: f64,
        low: f64,
        exclude_included: bool,
        allow_equal: Option<AllowEqual>,
    ) -> ChanResult<MergeDir> {
        let dir = self.test_combine(high, low, exclude_included, allow_equal)?;
        if dir == MergeDir::Combine {
            self.members.push(idx);
            match self.dir {
                Direction::Up => {
                    if high != low || high != self.high {
                        self.high = self.high.max(high);
                        self.low = self.low.max(low);
                    }
                }
                Direction::Down => {
                    if high != low || low != self.low {
                        self.high = self.high.min(high);
                        self.low = self.low.min(low);
                    }
                }
            }
        }
        Ok(dir)
    }

    /// Classify this element as a fractal given its neighbours' `(high, low)`.
    ///
    /// Only ever sets a classification; an element that fails the test keeps
    /// whatever it had.
    pub fn update_fx(
        &mut self,
        pre: (f64, f64),
        next: (f64, f64),
        exclude_included: bool,
        allow_equal: Option<AllowEqual>,
    ) {
        let (pre_high, pre_low) = pre;
        let (next_high, next_low) = next;
        let (high, low) = (self.high, self.low);
        if exclude_included {
            if pre_high < high && next_high <= high && next_low < low {
                if allow_equal == Some(AllowEqual::Top) || next_high < high {
                    self.fx = FxType::Top;
                }
            } else if next_high > high && pre_low > low && next_low >= low {
                if allow_equal == Some(AllowEqual::Bottom) || next_low > low {
                    self.fx = FxType::Bottom;
                }
            }
        } else if pre_high < high && next_high < high && pre_low < low && next_low < low {
            self.fx = FxType::Top;
        } else if pre_high > high && next_high > high && pre_low > low && next_low > low {
            self.fx = FxType::Bottom;
        }
    }

    /// Latest member whose own extreme equals the band's extreme.
    pub fn peak_member(&self, is_high: bool, extent: impl Fn(usize) -> (f64, f64)) -> Option<usize> {
        self.members.iter().rev().copied().find(|&m| {
            let (h, l) = extent(m);
            if is_high {
                h == self.high
            } else {
                l == self.low
            }
        })
    }
}
