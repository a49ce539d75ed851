//! Break-rule segmentation: a segment ends at its most extreme line once a
//! line of the other direction breaks the line two before it.

use crate::error::ChanResult;
use crate::line::Line;

use super::{SegReason, SegmentList};

pub(super) fn update<L: Line>(list: &mut SegmentList, lines: &mut [L]) -> ChanResult<()> {
    list.reset(lines);
    cal_sure(list, lines)?;
    list.collect_left(lines)
}

fn cal_sure<L: Line>(list: &mut SegmentList, lines: &mut [L]) -> ChanResult<()> {
    let mut peak: Option<usize> = None;
    for i in 2..lines.len() {
        let (dir, high, low) = (lines[i].dir(), lines[i].high(), lines[i].low());
        if let Some(p) = peak {
            let pl = &lines[p];
            let extends = pl.dir() == dir
                && ((dir.is_up() && high >= pl.high()) || (dir.is_down() && low <= pl.low()));
            if extends {
                peak = Some(i);
                continue;
            }
        }

        let pre = &lines[i - 2];
        let breaks = (dir.is_up() && high > pre.high()) || (dir.is_down() && low < pre.low());
        if !breaks {
            continue;
        }
        match peak {
            None => {
                if list.segs.last().map_or(true, |s| s.dir != dir) {
                    peak = Some(i);
                }
            }
            Some(p) if lines[p].dir() != dir => {
                if i - p <= 2 {
                    continue;
                }
                list.add_new(lines, p, true, None, true, SegReason::Normal)?;
                peak = Some(i);
            }
            Some(_) => {}
        }
    }
    if let Some(p) = peak {
        list.add_new(lines, p, false, None, true, SegReason::Normal)?;
    }
    Ok(())
}
