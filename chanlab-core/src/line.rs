//! The line capability shared by strokes and segments.
//!
//! Segment building, pivot building and signal classification are written
//! once against [`Line`] and run both over strokes and over segments.

use crate::domain::Direction;
use crate::merge::BarUnit;
use crate::metric::{self, MetricAlgo, MetricInput, UnitRef, UnitSpan};

pub trait Line {
    fn idx(&self) -> usize;
    fn dir(&self) -> Direction;
    fn is_sure(&self) -> bool;

    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn begin_val(&self) -> f64;
    fn end_val(&self) -> f64;

    fn begin_unit(&self) -> UnitRef;
    fn end_unit(&self) -> UnitRef;
    fn span(&self) -> UnitSpan;

    /// Index of the owning segment as assigned by the last segment pass.
    fn seg_idx(&self) -> Option<usize>;
    fn set_seg_idx(&mut self, idx: Option<usize>);

    /// Segment whose member list currently holds this line.
    fn parent_seg(&self) -> Option<usize>;
    fn set_parent_seg(&mut self, idx: Option<usize>);

    fn is_up(&self) -> bool {
        self.dir().is_up()
    }

    fn is_down(&self) -> bool {
        self.dir().is_down()
    }

    fn amp(&self) -> f64 {
        (self.end_val() - self.begin_val()).abs()
    }

    fn metric(&self, units: &[BarUnit], algo: MetricAlgo, reverse: bool) -> f64 {
        let input = MetricInput {
            dir: self.dir(),
            begin: self.begin_unit(),
            end: self.end_unit(),
            span: self.span(),
        };
        metric::compute(&input, units, algo, reverse)
    }
}

/// Most extreme line among `candidates` in the given direction.
///
/// Up lines compete on their end value for a high peak, down lines for a low
/// one; later candidates win ties. A candidate whose second predecessor ended
/// beyond it is skipped.
pub fn find_peak_line<L: Line>(
    lines: &[L],
    candidates: impl IntoIterator<Item = usize>,
    is_high: bool,
) -> Option<usize> {
    let mut peak_val = if is_high {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    };
    let mut peak = None;
    for i in candidates {
        let Some(line) = lines.get(i) else { continue };
        let v = line.end_val();
        let hit = if is_high {
            line.is_up() && v >= peak_val
        } else {
            line.is_down() && v <= peak_val
        };
        if !hit {
            continue;
        }
        if i >= 2 {
            let pre2 = lines[i - 2].end_val();
            if (is_high && pre2 > v) || (!is_high && pre2 < v) {
                continue;
            }
        }
        peak_val = v;
        peak = Some(i);
    }
    peak
}


#[cfg(test)]
mod tests {
    use super::testing::zigzag;
    use super::*;

    #[test]
    fn peak_line_takes_highest_up_line() {
        let lines = zigzag(&[10.0, 15.0, 12.0, 18.0, 14.0, 16.0]);
        assert_eq!(find_peak_line(&lines, 0..lines.len(), true), Some(2));
        assert_eq!(find_peak_line(&lines, 0..lines.len(), false), Some(1));
    }

    #[test]
    fn peak_line_skips_candidates_below_second_predecessor() {
        // line 4 beats line 0 but line 2 ended higher
        let lines = zigzag(&[10.0, 15.0, 12.0, 18.0, 14.0, 17.0]);
        assert_eq!(find_peak_line(&lines, [0, 4], true), Some(0));
    }
}
