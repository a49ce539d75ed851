//! Incremental stroke construction over a merged-bar series.
//!
//! Confirmed strokes only ever end on a closed fractal. In step mode a
//! provisional (virtual) stroke may additionally track the newest merged bar;
//! it is torn down before every confirmed update so the confirmed list is the
//! same whether or not virtual strokes were ever drawn.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::{StrokeAlgo, StrokeConfig};
use crate::domain::{Direction, FxType};
use crate::error::{ChanError, ChanResult};
use crate::line::Line;
use crate::merge::BarSeries;

use super::Stroke;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeList {
    strokes: Vec<Stroke>,
    /// Merged bar the newest stroke currently ends on.
    last_end: Option<usize>,
    /// Fractals seen before the first stroke formed.
    free: Vec<usize>,
    config: StrokeConfig,
}

impl StrokeList {
    pub fn new(config: StrokeConfig) -> Self {
        Self {
            strokes: Vec::new(),
            last_end: None,
            free: Vec::new(),
            config,
        }
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub(crate) fn strokes_mut(&mut self) -> &mut [Stroke] {
        &mut self.strokes
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn last(&self) -> Option<&Stroke> {
        self.strokes.last()
    }

    fn last_end_unit(&self) -> Option<usize> {
        self.strokes.last().map(|s| s.end_unit().idx)
    }

    fn fx_of(series: &BarSeries, merged: usize) -> FxType {
        series
            .bars()
            .get(merged)
            .map(|b| b.fx())
            .unwrap_or_default()
    }

    /// Feed the second-newest merged bar (`klc`) as a confirmed candidate and,
    /// with `cal_virtual`, the newest one (`last_klc`) as a provisional end.
    ///
    /// Returns whether the stroke list changed.
    pub(crate) fn update(
        &mut self,
        series: &BarSeries,
        klc: usize,
        last_klc: usize,
        cal_virtual: bool,
    ) -> ChanResult<bool> {
        let sure_changed = self.update_sure(series, klc)?;
        if cal_virtual {
            let virtual_changed = self.try_add_virtual(series, last_klc, false)?;
            return Ok(sure_changed || virtual_changed);
        }
        Ok(sure_changed)
    }

    fn update_sure(&mut self, series: &BarSeries, klc: usize) -> ChanResult<bool> {
        let before = self.last_end_unit();
        self.delete_virtual(series)?;

        let fx = Self::fx_of(series, klc);
        if fx == FxType::Unknown {
            return Ok(before != self.last_end_unit());
        }

        let last_end = match self.last_end {
            Some(end) if !self.strokes.is_empty() => end,
            _ => return self.try_create_first(series, klc),
        };

        if fx == Self::fx_of(series, last_end) {
            return self.try_update_end(series, klc, false);
        }
        if self.can_make(series, klc, last_end, false)? {
            self.add_new(series, last_end, klc, true)?;
            self.last_end = Some(klc);
            return Ok(true);
        }
        if self.update_peak(series, klc, false)? {
            return Ok(true);
        }
        Ok(before != self.last_end_unit())
    }

    fn try_create_first(&mut self, series: &BarSeries, klc: usize) -> ChanResult<bool> {
        let fx = Self::fx_of(series, klc);
        for i in 0..self.free.len() {
            let candidate = self.free[i];
            if Self::fx_of(series, candidate) == fx {
                continue;
            }
            if self.can_make(series, klc, candidate, false)? {
                self.add_new(series, candidate, klc, true)?;
                self.last_end = Some(klc);
                trace!(begin = candidate, end = klc, "first stroke");
                return Ok(true);
            }
        }
        self.free.push(klc);
        self.last_end = Some(klc);
        Ok(false)
    }

    /// Drop the provisional stroke, or roll a provisionally extended stroke
    /// back to its confirmed end (re-adding any stroke a provisional
    /// substitution had absorbed).
    pub(crate) fn delete_virtual(&mut self, series: &BarSeries) -> ChanResult<()> {
        let unsure_tail = self.strokes.last().map(|s| !s.is_sure()).unwrap_or(false);
        if unsure_tail {
            let sure_end = self
                .strokes
                .last()
                .map(|s| s.sure_end().to_vec())
                .unwrap_or_default();
            if let Some((&first, rest)) = sure_end.split_first() {
                if let Some(last) = self.strokes.last_mut() {
                    last.restore_from_virtual_end(series, first)?;
                }
                let mut begin = first;
                for &end in rest {
                    self.add_new(series, begin, end, true)?;
                    begin = end;
                }
            } else {
                self.strokes.pop();
            }
        }
        self.last_end = self.strokes.last().map(|s| s.end());
        Ok(())
    }

    /// Try to draw or extend a provisional stroke towards `klc`.
    pub(crate) fn try_add_virtual(
        &mut self,
        series: &BarSeries,
        klc: usize,
        need_del_end: bool,
    ) -> ChanResult<bool> {
        if need_del_end {
            self.delete_virtual(series)?;
        }
        let Some(last) = self.strokes.last() else {
            return Ok(false);
        };
        let end = last.end();
        if klc == end {
            return Ok(false);
        }
        let (Some(cand), Some(end_bar)) = (series.bars().get(klc), series.bars().get(end)) else {
            return Err(ChanError::invariant(format!(
                "provisional stroke end {klc} or {end} out of range"
            )));
        };
        let extends = match last.dir() {
            Direction::Up => cand.high() >= end_bar.high(),
            Direction::Down => cand.low() <= end_bar.low(),
        };
        if extends {
            if let Some(last) = self.strokes.last_mut() {
                last.update_virtual_end(series, klc)?;
            }
            return Ok(true);
        }

        let mut tmp = klc;
        while tmp > end {
            if self.can_make(series, tmp, end, true)? {
                self.add_new(series, end, tmp, false)?;
                return Ok(true);
            }
            if self.update_peak(series, tmp, true)? {
                return Ok(true);
            }
            tmp -= 1;
        }
        Ok(false)
    }

    fn add_new(&mut self, series: &BarSeries, begin: usize, end: usize, is_sure: bool) -> ChanResult<()> {
        let stroke = Stroke::new(series, begin, end, self.strokes.len(), is_sure)?;
        self.strokes.push(stroke);
        Ok(())
    }

    /// Whether `klc` may replace the end of the second-newest stroke,
    /// absorbing the newest one.
    fn can_update_peak(&self, series: &BarSeries, klc: usize) -> bool {
        if !self.config.allow_sub_peak || self.strokes.len() < 2 {
            return false;
        }
        let n = self.strokes.len();
        let (prev, last) = (&self.strokes[n - 2], &self.strokes[n - 1]);
        let Some(bar) = series.bars().get(klc) else {
            return false;
        };
        if last.is_down() && bar.high() < last.begin_val() {
            return false;
        }
        if last.is_up() && bar.low() > last.begin_val() {
            return false;
        }
        if !series.end_is_peak(prev.begin(), klc) {
            return false;
        }
        if last.is_down() && last.end_val() < prev.begin_val() {
            return false;
        }
        if last.is_up() && last.end_val() > prev.begin_val() {
            return false;
        }
        true
    }

    fn update_peak(&mut self, series: &BarSeries, klc: usize, for_virtual: bool) -> ChanResult<bool> {
        if !self.can_update_peak(series, klc) {
            return Ok(false);
        }
        let Some(popped) = self.strokes.pop() else {
            return Ok(false);
        };
        if !self.try_update_end(series, klc, for_virtual)? {
            self.strokes.push(popped);
            return Ok(false);
        }
        if for_virtual {
            if let Some(last) = self.strokes.last_mut() {
                last.append_sure_end(popped.end());
            }
        }
        trace!(end = klc, virtual_end = for_virtual, "stroke end moved to sub-peak");
        Ok(true)
    }

    fn try_update_end(&mut self, series: &BarSeries, klc: usize, for_virtual: bool) -> ChanResult<bool> {
        let Some(last) = self.strokes.last() else {
            return Ok(false);
        };
        let Some(bar) = series.bars().get(klc) else {
            return Ok(false);
        };
        let end_val = last.end_val();
        let accepted = match last.dir() {
            Direction::Up => {
                let top = if for_virtual {
                    bar.dir() == Direction::Up
                } else {
                    bar.fx() == FxType::Top
                };
                top && bar.high() >= end_val
            }
            Direction::Down => {
                let bottom = if for_virtual {
                    bar.dir() == Direction::Down
                } else {
                    bar.fx() == FxType::Bottom
                };
                bottom && bar.low() <= end_val
            }
        };
        if !accepted {
            return Ok(false);
        }
        if let Some(last) = self.strokes.last_mut() {
            if for_virtual {
                last.update_virtual_end(series, klc)?;
            } else {
                last.update_new_end(series, klc)?;
            }
        }
        self.last_end = Some(klc);
        Ok(true)
    }

    fn can_make(
        &self,
        series: &BarSeries,
        klc: usize,
        last_end: usize,
        for_virtual: bool,
    ) -> ChanResult<bool> {
        let span_ok = self.config.algo == StrokeAlgo::Fx || self.satisfy_span(series, klc, last_end);
        if !span_ok {
            return Ok(false);
        }
        if !series.check_fx_valid(last_end, klc, self.config.fx_check, for_virtual)? {
            return Ok(false);
        }
        if self.config.end_is_peak && !series.end_is_peak(last_end, klc) {
            return Ok(false);
        }
        Ok(true)
    }

    fn satisfy_span(&self, series: &BarSeries, klc: usize, last_end: usize) -> bool {
        let span = self.klc_span(series, klc, last_end);
        if self.config.strict {
            return span >= 4;
        }
        let bars = series.bars();
        let mut unit_cnt = 0;
        let mut i = last_end + 1;
        while let Some(bar) = bars.get(i) {
            unit_cnt += bar.units().len();
            if i + 1 >= bars.len() {
                return false;
            }
            if i + 1 < klc {
                i += 1;
            } else {
                break;
            }
        }
        span >= 3 && unit_cnt >= 3
    }

    fn klc_span(&self, series: &BarSeries, klc: usize, last_end: usize) -> usize {
        let mut span = klc.saturating_sub(last_end);
        if !self.config.gap_as_kl || span >= 4 {
            return span;
        }
        for i in last_end..klc {
            if series.has_gap_with_next(i) {
                span += 1;
            }
        }
        span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FxCheck;
    use crate::domain::Bar;
    use crate::merge::{Appended, BarUnit};
    use chrono::NaiveDate;

    fn bar(i: i64, high: f64, low: f64) -> Bar {
        let t = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::days(i);
        Bar::new(t, low, high, low, high)
    }

    /// Bars walking linearly between the given turning points, one unit per step.
    fn walk(points: &[f64], steps: usize) -> Vec<(f64, f64)> {
        let mut out = Vec::new();
        for w in points.windows(2) {
            for k in 0..steps {
                let mid = w[0] + (w[1] - w[0]) * k as f64 / steps as f64;
                out.push((mid + 0.5, mid - 0.5));
            }
        }
        let last = points[points.len() - 1];
        out.push((last + 0.5, last - 0.5));
        out
    }

    fn run(ranges: &[(f64, f64)], config: StrokeConfig, cal_virtual: bool) -> (BarSeries, StrokeList) {
        let mut series = BarSeries::new();
        let mut list = StrokeList::new(config);
        for (i, &(h, l)) in ranges.iter().enumerate() {
            let appended = series.push(BarUnit::new(0, bar(i as i64, h, l))).unwrap();
            let n = series.len();
            match appended {
                Appended::NewBar if n >= 2 => {
                    list.update(&series, n - 2, n - 1, cal_virtual).unwrap();
                }
                Appended::Merged if cal_virtual => {
                    list.try_add_virtual(&series, n - 1, true).unwrap();
                }
                _ => {}
            }
        }
        (series, list)
    }

    fn sure_only(list: &StrokeList) -> Vec<(usize, usize)> {
        list.strokes()
            .iter()
            .filter(|s| s.is_sure())
            .map(|s| (s.begin(), s.end()))
            .collect()
    }

    #[test]
    fn zigzag_produces_alternating_strokes() {
        let ranges = walk(&[10.0, 20.0, 12.0, 22.0, 14.0], 6);
        let (_, list) = run(&ranges, StrokeConfig::default(), false);
        assert!(list.len() >= 2, "expected strokes, got {}", list.len());
        for w in list.strokes().windows(2) {
            assert_ne!(w[0].dir(), w[1].dir());
            assert_eq!(w[0].end(), w[1].begin());
        }
        assert!(list.strokes().iter().all(|s| s.is_sure()));
    }

    #[test]
    fn short_swings_do_not_form_strokes() {
        let ranges = walk(&[10.0, 11.0, 10.0, 11.0], 2);
        let (_, list) = run(&ranges, StrokeConfig::default(), false);
        assert!(list.is_empty());
    }

    #[test]
    fn fx_algo_ignores_span() {
        let config = StrokeConfig {
            algo: StrokeAlgo::Fx,
            fx_check: FxCheck::Loss,
            end_is_peak: false,
            ..StrokeConfig::default()
        };
        let ranges = walk(&[10.0, 14.0, 8.0, 14.0, 8.0], 2);
        let (_, fx_list) = run(&ranges, config, false);
        let (_, normal) = run(&ranges, StrokeConfig::default(), false);
        assert!(fx_list.len() > normal.len());
    }

    #[test]
    fn virtual_strokes_leave_confirmed_list_unchanged() {
        let ranges = walk(&[10.0, 20.0, 12.0, 22.0, 14.0, 25.0, 16.0], 5);
        let (_, batch) = run(&ranges, StrokeConfig::default(), false);
        let (series, mut step) = run(&ranges, StrokeConfig::default(), true);
        step.delete_virtual(&series).unwrap();
        assert_eq!(sure_only(&batch), sure_only(&step));
        assert_eq!(batch.len(), step.len());
    }

    #[test]
    fn virtual_stroke_tracks_the_newest_bar() {
        let ranges = walk(&[10.0, 20.0, 12.0, 22.0, 14.0], 6);
        let (series, mut list) = run(&ranges, StrokeConfig::default(), false);
        let before = list.len();
        let added = list.try_add_virtual(&series, series.len() - 1, false).unwrap();
        if added {
            let last = list.last().unwrap();
            assert!(last.end() < series.len());
            assert!(!last.is_sure());
            list.delete_virtual(&series).unwrap();
        }
        assert_eq!(list.len(), before);
        assert!(list.strokes().iter().all(|s| s.is_sure()));
    }
}
