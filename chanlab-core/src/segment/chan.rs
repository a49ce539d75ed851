//! Feature-sequence segmentation.

use crate::domain::Direction;
use crate::error::ChanResult;
use crate::line::Line;

use super::feature::FeatureFx;
use super::{SegReason, SegmentList};

pub(super) fn update<L: Line>(list: &mut SegmentList, lines: &mut [L]) -> ChanResult<()> {
    retract_unconfirmed(list, lines);
    for seg in list.segs.iter_mut() {
        seg.refresh(lines)?;
    }
    let begin = list.segs.last().map_or(0, |s| s.end + 1);
    cal_sure(list, lines, begin)?;
    list.collect_left(lines)
}

/// Pop provisional segments, then the last confirmed one if the line that
/// confirmed it has itself been retracted or is still provisional.
fn retract_unconfirmed<L: Line>(list: &mut SegmentList, lines: &mut [L]) {
    while list.segs.last().is_some_and(|s| !s.is_sure) {
        list.pop_last(lines);
    }
    let tail_sure = list
        .segs
        .last()
        .map(|s| s.feature_tail.and_then(|t| lines.get(t)).is_some_and(|l| l.is_sure()));
    if tail_sure == Some(false) {
        list.pop_last(lines);
    }
}

fn cal_sure<L: Line>(list: &mut SegmentList, lines: &mut [L], mut begin: usize) -> ChanResult<()> {
    loop {
        let Some(fx) = scan(list, lines, begin)? else {
            return Ok(());
        };
        let confirmed = fx.can_be_end(lines)?;
        let end = fx.peak_line(lines)?;
        let is_sure = confirmed && fx.all_lines_sure(lines);
        if !list.add_new(lines, end, is_sure, None, true, SegReason::Normal)? {
            begin = end + 1;
            continue;
        }
        if let Some(seg) = list.segs.last_mut() {
            seg.feature_tail = fx.tail();
        }
        if !confirmed {
            return Ok(());
        }
        begin = end + 1;
    }
}

/// Feed lines from `begin` into the two feature sequences until one forms a
/// fractal.
///
/// Before the first segment exists its direction is unknown, so both
/// sequences run; whichever direction shows a second element first wins
/// and the other sequence is cleared.
fn scan<L: Line>(list: &SegmentList, lines: &[L], begin: usize) -> ChanResult<Option<FeatureFx>> {
    let mut up = FeatureFx::new(Direction::Up, true);
    let mut down = FeatureFx::new(Direction::Down, true);
    let mut last_dir = list.segs.last().map(|s| s.dir);
    let bootstrapping = list.segs.is_empty();

    for i in begin..lines.len() {
        let dir = lines[i].dir();
        let mut hit = None;
        if dir.is_down() && last_dir != Some(Direction::Up) {
            if up.add(lines, i)? {
                hit = Some(Direction::Up);
            }
        } else if dir.is_up() && last_dir != Some(Direction::Down) && down.add(lines, i)? {
            hit = Some(Direction::Down);
        }

        if bootstrapping {
            if up.has_second() && dir.is_down() {
                last_dir = Some(Direction::Down);
                down.clear();
            } else if down.has_second() && dir.is_up() {
                last_dir = Some(Direction::Up);
                up.clear();
            }
            if !up.has_second() && last_dir == Some(Direction::Down) && dir.is_down() {
                last_dir = None;
            } else if !down.has_second() && last_dir == Some(Direction::Up) && dir.is_up() {
                last_dir = None;
            }
        }

        match hit {
            Some(Direction::Up) => return Ok(Some(up)),
            Some(Direction::Down) => return Ok(Some(down)),
            None => {}
        }
    }
    Ok(None)
}
