//! Strokes: directional swings between two fractal merged bars.

pub mod list;

pub use list::StrokeList;

use serde::{Deserialize, Serialize};

use crate::domain::{Direction, FxType};
use crate::error::{ChanError, ChanResult};
use crate::line::Line;
use crate::merge::BarSeries;
use crate::metric::{UnitRef, UnitSpan};

/// A stroke between the merged bars `begin` and `end`.
///
/// Endpoint values are cached from the merged-bar series and refreshed every
/// time an endpoint moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    idx: usize,
    dir: Direction,
    begin: usize,
    end: usize,
    is_sure: bool,
    /// Confirmed endpoints superseded by provisional extensions, oldest first.
    sure_end: Vec<usize>,
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

impl Stroke {
    pub(crate) fn new(
        series: &BarSeries,
        begin: usize,
        end: usize,
        idx: usize,
        is_sure: bool,
    ) -> ChanResult<Self> {
        let dir = match series.bars().get(begin).map(|b| b.fx()) {
            Some(FxType::Bottom) => Direction::Up,
            Some(FxType::Top) => Direction::Down,
            _ => {
                return Err(ChanError::invariant(format!(
                    "stroke {idx} begins at merged bar {begin} which is not a fractal"
                )))
            }
        };
        let mut stroke = Self {
            idx,
            dir,
            begin,
            end,
            is_sure,
            sure_end: Vec::new(),
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
        stroke.refresh(series)?;
        Ok(stroke)
    }

    /// Merged bar holding the begin fractal.
    pub fn begin(&self) -> usize {
        self.begin
    }

    /// Merged bar holding the end fractal (or provisional end).
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn sure_end(&self) -> &[usize] {
        &self.sure_end
    }

    /// Raw units from the begin extreme to the end extreme, inclusive.
    pub fn unit_count(&self) -> usize {
        self.end_unit.idx - self.begin_unit.idx + 1
    }

    /// Merged bars from begin to end, inclusive.
    pub fn merged_count(&self) -> usize {
        self.end - self.begin + 1
    }

    /// Re-derive cached values from the series and validate price ordering.
    pub(crate) fn refresh(&mut self, series: &BarSeries) -> ChanResult<()> {
        let bars = series.bars();
        let (Some(b), Some(e)) = (bars.get(self.begin), bars.get(self.end)) else {
            return Err(ChanError::invariant(format!(
                "stroke {} references missing merged bars {}..{}",
                self.idx, self.begin, self.end
            )));
        };
        let ordered = match self.dir {
            Direction::Down => b.high() > e.low(),
            Direction::Up => b.low() < e.high(),
        };
        if !ordered {
            return Err(ChanError::invariant(format!(
                "stroke {} direction disagrees with its endpoints ({} .. {})",
                self.idx, b.time_begin, e.time_end
            )));
        }
        let up = self.dir.is_up();
        self.begin_val = if up { b.low() } else { b.high() };
        self.end_val = if up { e.high() } else { e.low() };
        self.high = if up { e.high() } else { b.high() };
        self.low = if up { b.low() } else { e.low() };
        self.begin_unit = series.peak_unit(self.begin, !up)?;
        self.end_unit = series.peak_unit(self.end, up)?;
        self.span = series.span(self.begin, self.end)?;
        Ok(())
    }

    pub(crate) fn update_new_end(&mut self, series: &BarSeries, end: usize) -> ChanResult<()> {
        self.end = end;
        self.refresh(series)
    }

    /// Move the end provisionally, remembering the current end for replay.
    pub(crate) fn update_virtual_end(&mut self, series: &BarSeries, end: usize) -> ChanResult<()> {
        self.sure_end.push(self.end);
        self.update_new_end(series, end)?;
        self.is_sure = false;
        Ok(())
    }

    pub(crate) fn restore_from_virtual_end(
        &mut self,
        series: &BarSeries,
        sure_end: usize,
    ) -> ChanResult<()> {
        self.is_sure = true;
        self.update_new_end(series, sure_end)?;
        self.sure_end.clear();
        Ok(())
    }

    pub(crate) fn append_sure_end(&mut self, end: usize) {
        self.sure_end.push(end);
    }
}

impl Line for Stroke {
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
