//! One timeframe's structural pipeline: merged bars, strokes, segments,
//! segments-of-segments, pivots at both line levels and signal points.
//!
//! In step mode every bar that changes the stroke list triggers a full
//! recompute of the derived structures. In batch mode bars only build the
//! merged series and strokes; [`Level::recompute`] derives the rest once.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::ChanConfig;
use crate::domain::{Bar, Period};
use crate::error::ChanResult;
use crate::indicators::{Macd, Rsi};
use crate::merge::{Appended, BarSeries, BarUnit, MergedBar};
use crate::metric::MetricAlgo;
use crate::pivot::{Pivot, PivotList};
use crate::segment::{Segment, SegmentList};
use crate::signal::{SignalList, SignalPoint};
use crate::stroke::{Stroke, StrokeList};

#[derive(Debug, Clone)]
pub struct Level {
    period: Period,
    series: BarSeries,
    strokes: StrokeList,
    segs: SegmentList,
    segsegs: SegmentList,
    pivots: PivotList,
    seg_pivots: PivotList,
    signals: SignalList,
    seg_signals: SignalList,

    macd: Macd,
    rsi: Option<Rsi>,
    last_sure_seg_start: Option<usize>,
    last_sure_segseg_start: Option<usize>,
    step: bool,
}

/// Whether any configured signal metric reads per-bar RSI.
fn needs_rsi(config: &ChanConfig) -> bool {
    config.compute_rsi
        || [&config.signal, &config.seg_signal]
            .iter()
            .flat_map(|s| [&s.buy, &s.sell])
            .any(|p| p.metric == MetricAlgo::Rsi)
}

impl Level {
    pub fn new(period: Period, config: &ChanConfig) -> Self {
        Self {
            period,
            series: BarSeries::new(),
            strokes: StrokeList::new(config.stroke.clone()),
            segs: SegmentList::new(config.segment.clone()),
            segsegs: SegmentList::new(config.segment.clone()),
            pivots: PivotList::new(config.pivot.clone()),
            seg_pivots: PivotList::new(config.pivot.clone()),
            signals: SignalList::new(config.signal.clone()),
            seg_signals: SignalList::new(config.seg_signal.clone()),
            macd: Macd::new(config.macd.fast, config.macd.slow, config.macd.signal),
            rsi: needs_rsi(config).then(|| Rsi::new(config.rsi_period)),
            last_sure_seg_start: None,
            last_sure_segseg_start: None,
            step: config.trigger_step,
        }
    }

    /// Append one validated bar and update strokes. Returns the new unit's index.
    pub fn feed(&mut self, bar: Bar) -> ChanResult<usize> {
        let mut unit = BarUnit::new(self.series.units().len(), bar);
        let mut macd = self.macd.clone();
        let mut rsi = self.rsi.clone();
        unit.macd = macd.add(unit.bar.close);
        unit.rsi = rsi.as_mut().map(|r| r.add(unit.bar.close));

        let appended = self.series.push(unit)?;
        self.macd = macd;
        self.rsi = rsi;
        let n = self.series.len();
        let changed = match appended {
            Appended::NewBar if n >= 2 => self.strokes.update(&self.series, n - 2, n - 1, self.step)?,
            Appended::NewBar => false,
            Appended::Merged if self.step => self.strokes.try_add_virtual(&self.series, n - 1, true)?,
            Appended::Merged => false,
        };
        if changed && self.step {
            self.derive()?;
        }
        Ok(self.series.units().len() - 1)
    }

    /// Rebuild every structure above the strokes. In batch mode the newest
    /// merged bar is first offered as a provisional stroke end.
    pub fn recompute(&mut self) -> ChanResult<()> {
        if !self.step {
            if let Some(last) = self.series.len().checked_sub(1) {
                self.strokes.try_add_virtual(&self.series, last, false)?;
            }
        }
        self.derive()
    }

    fn derive(&mut self) -> ChanResult<()> {
        self.last_sure_seg_start = self
            .segs
            .cal(self.strokes.strokes_mut(), self.last_sure_seg_start)?;
        self.pivots.cal(self.strokes.strokes(), self.segs.segments());
        self.pivots
            .assign_to_segments(self.strokes.strokes(), self.segs.segments_mut())?;

        self.last_sure_segseg_start = self
            .segsegs
            .cal(self.segs.segments_mut(), self.last_sure_segseg_start)?;
        self.seg_pivots.cal(self.segs.segments(), self.segsegs.segments());
        self.seg_pivots
            .assign_to_segments(self.segs.segments(), self.segsegs.segments_mut())?;

        self.seg_signals.cal(
            self.segs.segments(),
            self.segsegs.segments(),
            self.seg_pivots.pivots(),
            self.series.units(),
        )?;
        self.signals.cal(
            self.strokes.strokes(),
            self.segs.segments(),
            self.pivots.pivots(),
            self.series.units(),
        )?;
        trace!(
            period = %self.period,
            strokes = self.strokes.len(),
            segments = self.segs.len(),
            pivots = self.pivots.len(),
            signals = self.signals.len(),
            "level derived"
        );
        Ok(())
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn series(&self) -> &BarSeries {
        &self.series
    }

    pub(crate) fn series_mut(&mut self) -> &mut BarSeries {
        &mut self.series
    }

    pub fn units(&self) -> &[BarUnit] {
        self.series.units()
    }

    pub fn bars(&self) -> &[MergedBar] {
        self.series.bars()
    }

    pub fn strokes(&self) -> &[Stroke] {
        self.strokes.strokes()
    }

    pub fn segments(&self) -> &[Segment] {
        self.segs.segments()
    }

    pub fn segsegs(&self) -> &[Segment] {
        self.segsegs.segments()
    }

    /// Pivots over strokes.
    pub fn pivots(&self) -> &[Pivot] {
        self.pivots.pivots()
    }

    /// Pivots over segments.
    pub fn seg_pivots(&self) -> &[Pivot] {
        self.seg_pivots.pivots()
    }

    pub fn signals(&self) -> &SignalList {
        &self.signals
    }

    pub fn seg_signals(&self) -> &SignalList {
        &self.seg_signals
    }

    pub fn snapshot(&self) -> LevelSnapshot {
        LevelSnapshot {
            period: self.period,
            unit_count: self.series.units().len(),
            bars: self.series.bars().to_vec(),
            strokes: self.strokes().to_vec(),
            segments: self.segments().to_vec(),
            segsegs: self.segsegs().to_vec(),
            pivots: self.pivots().to_vec(),
            seg_pivots: self.seg_pivots().to_vec(),
            signals: self.signals.points().cloned().collect(),
            seg_signals: self.seg_signals.points().cloned().collect(),
        }
    }
}

/// Copy of one level's derived structures at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub period: Period,
    pub unit_count: usize,
    pub bars: Vec<MergedBar>,
    pub strokes: Vec<Stroke>,
    pub segments: Vec<Segment>,
    pub segsegs: Vec<Segment>,
    pub pivots: Vec<Pivot>,
    pub seg_pivots: Vec<Pivot>,
    pub signals: Vec<SignalPoint>,
    pub seg_signals: Vec<SignalPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::Line;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn t(i: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::days(i)
    }

    /// Bars whose highs and lows walk between the given turning points one
    /// step per bar.
    fn swing_bars(turns: &[f64]) -> Vec<Bar> {
        let mut mids = vec![turns[0]];
        for pair in turns.windows(2) {
            let steps = ((pair[1] - pair[0]).abs()).round() as usize;
            for s in 1..=steps {
                let f = s as f64 / steps as f64;
                mids.push(pair[0] + (pair[1] - pair[0]) * f);
            }
        }
        mids.iter()
            .enumerate()
            .map(|(i, &m)| Bar::new(t(i as i64), m, m + 0.5, m - 0.5, m))
            .collect()
    }

    fn run(step: bool, bars: &[Bar]) -> Level {
        let config = ChanConfig {
            trigger_step: step,
            ..ChanConfig::default()
        };
        let mut level = Level::new(Period::Day, &config);
        for bar in bars {
            level.feed(bar.clone()).unwrap();
        }
        if !step {
            level.recompute().unwrap();
        }
        level
    }

    #[test]
    fn batch_builds_strokes_after_recompute() {
        let bars = swing_bars(&[10.0, 20.0, 12.0, 22.0, 14.0]);
        let level = run(false, &bars);
        assert_eq!(level.units().len(), bars.len());
        let sure: Vec<_> = level.strokes().iter().filter(|s| s.is_sure()).collect();
        assert!(sure.len() >= 3);
        for pair in sure.windows(2) {
            assert_ne!(pair[0].dir(), pair[1].dir());
        }
    }

    #[test]
    fn step_and_batch_agree() {
        let bars = swing_bars(&[10.0, 20.0, 12.0, 22.0, 14.0, 25.0, 16.0, 19.0, 11.0]);
        let batch = run(false, &bars);
        let step = run(true, &bars);
        assert_eq!(batch.strokes(), step.strokes());
        assert_eq!(batch.segments(), step.segments());
        assert_eq!(batch.pivots(), step.pivots());
        assert_eq!(
            batch.signals().points().collect::<Vec<_>>(),
            step.signals().points().collect::<Vec<_>>()
        );
    }

    #[test]
    fn failed_push_keeps_indicator_state() {
        let config = ChanConfig {
            compute_rsi: true,
            ..ChanConfig::default()
        };
        let bars = swing_bars(&[10.0, 14.0]);
        let expected = {
            let mut level = Level::new(Period::Day, &config);
            for bar in &bars {
                level.feed(bar.clone()).unwrap();
            }
            level
        };

        let mut level = Level::new(Period::Day, &config);
        level.feed(bars[0].clone()).unwrap();
        // a NaN high cannot be classified against the previous bar
        let broken = Bar::new(t(100), 50.0, f64::NAN, 49.0, 50.0);
        assert!(level.feed(broken).is_err());
        assert_eq!(level.units().len(), 1);
        for bar in &bars[1..] {
            level.feed(bar.clone()).unwrap();
        }

        let last = level.units().len() - 1;
        assert_eq!(level.units()[last].macd, expected.units()[last].macd);
        assert_eq!(level.units()[last].rsi, expected.units()[last].rsi);
    }

    #[test]
    fn rsi_is_only_tracked_when_needed() {
        let bars = swing_bars(&[10.0, 12.0]);
        let plain = run(false, &bars);
        assert!(plain.units().iter().all(|u| u.rsi.is_none()));

        let config = ChanConfig {
            compute_rsi: true,
            ..ChanConfig::default()
        };
        let mut level = Level::new(Period::Day, &config);
        for bar in bars {
            level.feed(bar).unwrap();
        }
        assert_eq!(level.units()[0].rsi, Some(50.0));
    }
}
