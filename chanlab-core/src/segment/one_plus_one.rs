//! "1+1" segmentation: a segment ends one line before a line that either
//! fails to pass the line two before it and is then overtaken, or passes it
//! and is followed through.

use crate::domain::Direction;
use crate::error::ChanResult;
use crate::line::Line;

use super::{SegReason, SegmentList};

pub(super) fn update<L: Line>(list: &mut SegmentList, lines: &mut [L]) -> ChanResult<()> {
    list.reset(lines);
    cal_sure(list, lines)?;
    extend_last(list, lines)?;
    if list.tail_breaks_last(lines) {
        cal_unsure(list, lines)?;
    }
    list.collect_left(lines)
}

/// Pullback that fails to make a new extreme, then is overtaken by `next`.
fn failed_pullback<L: Line>(cur: &L, next: &L, pre: &L) -> bool {
    match cur.dir() {
        Direction::Down => cur.low() > pre.low() && next.high() < cur.high() && next.low() < cur.low(),
        Direction::Up => cur.high() < pre.high() && next.low() > cur.low() && next.high() > cur.high(),
    }
}

/// Pullback that makes a new extreme and is continued by `next`.
fn followed_through<L: Line>(cur: &L, next: &L, pre: &L) -> bool {
    match cur.dir() {
        Direction::Down => cur.low() < pre.low() && next.high() < cur.high() && next.low() < pre.low(),
        Direction::Up => cur.high() > pre.high() && next.low() > cur.low() && next.high() > pre.high(),
    }
}

fn cal_sure<L: Line>(list: &mut SegmentList, lines: &mut [L]) -> ChanResult<()> {
    let n = lines.len();
    let mut next_begin = 0;
    for i in 2..n.saturating_sub(2) {
        if let Some(last) = list.segs.last() {
            if lines[i].dir() != lines[last.end].dir() {
                continue;
            }
        }
        let (cur, nb) = (&lines[i], &lines[next_begin]);
        if cur.is_down() && lines[i - 1].high() < nb.low() {
            continue;
        }
        if cur.is_up() && lines[i - 1].low() > nb.high() {
            continue;
        }
        let far_enough = list.segs.last().map_or(true, |s| i >= s.end + 4);
        if far_enough
            && (failed_pullback(cur, &lines[i + 2], &lines[i - 2])
                || followed_through(cur, &lines[i + 2], &lines[i - 2]))
        {
            list.add_new(lines, i - 1, true, None, true, SegReason::Normal)?;
            next_begin = i;
        }
    }
    Ok(())
}

/// Move the last segment's end to a later, more extreme line of the same
/// direction; the segment becomes provisional.
fn extend_last<L: Line>(list: &mut SegmentList, lines: &mut [L]) -> ChanResult<()> {
    let Some(last) = list.segs.last() else {
        return Ok(());
    };
    let end = last.end;
    let dir = lines[end].dir();
    let mut peak_val = lines[end].end_val();
    let mut new_end = None;
    for (j, line) in lines.iter().enumerate().skip(end + 1) {
        if line.dir() != dir {
            continue;
        }
        if dir.is_down() && line.low() < peak_val {
            peak_val = line.low();
            new_end = Some(j);
        } else if dir.is_up() && line.high() > peak_val {
            peak_val = line.high();
            new_end = Some(j);
        }
    }
    let Some(new_end) = new_end else {
        return Ok(());
    };
    let idx = last.idx;
    for line in lines.iter_mut().take(new_end + 1).skip(end + 1) {
        line.set_parent_seg(Some(idx));
    }
    if let Some(seg) = list.segs.last_mut() {
        seg.end = new_end;
        seg.is_sure = false;
        seg.refresh(lines)?;
    }
    Ok(())
}

/// After a break of the last segment's extreme, cut a provisional segment at
/// the most extreme opposite line.
fn cal_unsure<L: Line>(list: &mut SegmentList, lines: &mut [L]) -> ChanResult<()> {
    let Some(last) = list.segs.last() else {
        return Ok(());
    };
    let seg_dir = lines[last.end].dir();
    let mut peak_val = match seg_dir {
        Direction::Up => f64::INFINITY,
        Direction::Down => f64::NEG_INFINITY,
    };
    let mut end = None;
    for (j, line) in lines.iter().enumerate().skip(last.end + 3) {
        if line.dir() == seg_dir {
            continue;
        }
        let v = match seg_dir {
            Direction::Up => line.low(),
            Direction::Down => line.high(),
        };
        if (seg_dir.is_up() && v < peak_val) || (seg_dir.is_down() && v > peak_val) {
            end = Some(j);
            peak_val = v;
        }
    }
    if let Some(end) = end {
        list.add_new(lines, end, false, None, true, SegReason::Normal)?;
    }
    Ok(())
}
