//! Signal classification over one line level.
//!
//! Points whose anchor line ends after the latest confirmed segment's end
//! line began are discarded and recomputed on every pass; earlier points are
//! final.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{PointConfig, SignalConfig};
use crate::domain::has_overlap;
use crate::error::{ChanError, ChanResult};
use crate::line::Line;
use crate::merge::BarUnit;
use crate::pivot::Pivot;
use crate::segment::Segment;

use super::{SignalPoint, SignalType};

/// Read-only inputs of one classification pass.
struct Ctx<'a, L> {
    lines: &'a [L],
    segs: &'a [Segment],
    pivots: &'a [Pivot],
    units: &'a [BarUnit],
}

impl<L: Line> Ctx<'_, L> {
    fn seg_idx_of(&self, line: usize) -> ChanResult<usize> {
        self.lines[line]
            .seg_idx()
            .ok_or_else(|| ChanError::invariant(format!("line {line} has no segment tag")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalList {
    /// Points of the configured types, keyed by anchor line.
    points: BTreeMap<usize, SignalPoint>,
    /// Every type-1 anchor with its end unit, configured or not.
    type1: BTreeMap<usize, usize>,
    config: SignalConfig,
    last_sure_pos: Option<usize>,
    last_sure_seg_idx: usize,
}

impl SignalList {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            points: BTreeMap::new(),
            type1: BTreeMap::new(),
            config,
            last_sure_pos: None,
            last_sure_seg_idx: 0,
        }
    }

    /// Points ordered by anchor line.
    pub fn points(&self) -> impl Iterator<Item = &SignalPoint> + '_ {
        self.points.values()
    }

    pub fn get(&self, line: usize) -> Option<&SignalPoint> {
        self.points.get(&line)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Anchor lines of every type-1 candidate, including those filtered out
    /// by the configured types.
    pub fn type1_lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.type1.keys().copied()
    }

    pub(crate) fn cal<L: Line>(
        &mut self,
        lines: &[L],
        segs: &[Segment],
        pivots: &[Pivot],
        units: &[BarUnit],
    ) -> ChanResult<()> {
        let ctx = Ctx {
            lines,
            segs,
            pivots,
            units,
        };
        let keep = |unit: usize, pos: Option<usize>| pos.is_some_and(|p| unit <= p);
        let pos = self.last_sure_pos;
        self.points.retain(|_, p| keep(p.unit, pos));
        self.type1.retain(|_, &mut unit| keep(unit, pos));

        self.cal_type1(&ctx);
        self.cal_type2(&ctx)?;
        self.cal_type3(&ctx)?;

        match segs.iter().rev().find(|s| s.is_sure()) {
            Some(seg) => {
                self.last_sure_pos = Some(lines[seg.end()].begin_unit().idx);
                self.last_sure_seg_idx = seg.idx();
            }
            None => {
                self.last_sure_pos = None;
                self.last_sure_seg_idx = 0;
            }
        }
        Ok(())
    }

    fn seg_need_cal(&self, seg: &Segment) -> bool {
        self.last_sure_pos.map_or(true, |pos| seg.end_unit().idx > pos)
    }

    fn pending_segs<'a, L>(&self, ctx: &Ctx<'a, L>) -> &'a [Segment] {
        ctx.segs.get(self.last_sure_seg_idx..).unwrap_or(&[])
    }

    fn add<L: Line>(
        &mut self,
        ctx: &Ctx<'_, L>,
        ty: SignalType,
        line: usize,
        related_type1: Option<usize>,
        is_target: bool,
        divergence_rate: Option<f64>,
    ) {
        let anchor = &ctx.lines[line];
        let is_buy = anchor.is_down();
        if let Some(point) = self.points.get_mut(&line) {
            if !point.types.contains(&ty) {
                point.types.push(ty);
            }
            if point.related_type1.is_none() {
                point.related_type1 = related_type1;
            }
            return;
        }
        let is_target = is_target && self.config.side(is_buy).targets(ty);
        let unit = anchor.end_unit().idx;
        if ty.is_type1() {
            self.type1.insert(line, unit);
        }
        if !is_target {
            return;
        }
        debug!(line, ty = ty.as_str(), is_buy, "signal point");
        self.points.insert(
            line,
            SignalPoint {
                line,
                unit,
                is_buy,
                types: vec![ty],
                related_type1,
                divergence_rate,
            },
        );
    }

    // ─── Type 1 ─────────────────────────────────────────────────────

    fn cal_type1<L: Line>(&mut self, ctx: &Ctx<'_, L>) {
        for seg in self.pending_segs(ctx) {
            if !self.seg_need_cal(seg) {
                continue;
            }
            let conf = self.config.side(seg.is_down()).clone();
            let pivot_cnt = if conf.bsp1_only_multi_line_pivot {
                seg.multi_line_pivot_count(ctx.pivots)
            } else {
                seg.pivots().len()
            };
            let is_target = conf.min_pivot_cnt == 0 || pivot_cnt >= conf.min_pivot_cnt;

            let last = seg.pivots().last().and_then(|&i| ctx.pivots.get(i));
            match last {
                Some(p)
                    if !p.is_one_line()
                        && (p.line_out().is_some_and(|o| o >= seg.end()) || p.end_line() >= seg.end())
                        && p.line_in().is_some_and(|i| seg.end() > i + 2) =>
                {
                    self.type1_at_exit(ctx, seg, p, &conf, is_target)
                }
                _ => self.type1_in_range(ctx, seg, &conf, is_target),
            }
        }
    }

    fn type1_at_exit<L: Line>(
        &mut self,
        ctx: &Ctx<'_, L>,
        seg: &Segment,
        pivot: &Pivot,
        conf: &PointConfig,
        mut is_target: bool,
    ) {
        if conf.bs1_peak && !pivot.out_line_is_peak(ctx.lines, seg.end()) {
            is_target = false;
        }
        let (diverges, rate) = pivot.divergence(ctx.lines, ctx.units, conf, Some(seg.end()));
        if !diverges {
            is_target = false;
        }
        self.add(ctx, SignalType::T1, seg.end(), None, is_target, rate);
    }

    /// Divergence between the segment's last line and the same-direction line
    /// before it, when no pivot qualifies.
    fn type1_in_range<L: Line>(
        &mut self,
        ctx: &Ctx<'_, L>,
        seg: &Segment,
        conf: &PointConfig,
        mut is_target: bool,
    ) {
        let end = seg.end();
        let Some(pre) = end.checked_sub(2) else {
            return;
        };
        let (last, pre_line) = (&ctx.lines[end], &ctx.lines[pre]);
        if last.seg_idx() != pre_line.seg_idx() || last.dir() != seg.dir() {
            return;
        }
        if last.is_down() && last.low() > pre_line.low() {
            return;
        }
        if last.is_up() && last.high() < pre_line.high() {
            return;
        }
        let in_metric = pre_line.metric(ctx.units, conf.metric, false);
        let out_metric = last.metric(ctx.units, conf.metric, true);
        if !(out_metric <= conf.divergence_rate * in_metric) {
            is_target = false;
        }
        let rate = out_metric / (in_metric + 1e-7);
        self.add(ctx, SignalType::T1P, end, None, is_target, Some(rate));
    }

    // ─── Type 2 ─────────────────────────────────────────────────────

    fn cal_type2<L: Line>(&mut self, ctx: &Ctx<'_, L>) -> ChanResult<()> {
        for seg in self.pending_segs(ctx) {
            let conf = self.config.side(seg.is_down());
            if !conf.targets(SignalType::T2) && !conf.targets(SignalType::T2S) {
                continue;
            }
            if !self.seg_need_cal(seg) {
                continue;
            }
            self.type2(ctx, seg)?;
        }
        Ok(())
    }

    fn type2<L: Line>(&mut self, ctx: &Ctx<'_, L>, seg: &Segment) -> ChanResult<()> {
        let (conf, type1_line, break_line, anchor) = if ctx.segs.len() > 1 {
            let end = seg.end();
            if end + 2 >= ctx.lines.len() {
                return Ok(());
            }
            (self.config.side(seg.is_down()).clone(), Some(end), end + 1, end + 2)
        } else {
            if ctx.lines.len() < 2 {
                return Ok(());
            }
            (self.config.side(seg.is_up()).clone(), None, 0, 1)
        };
        let related = type1_line.filter(|l| self.type1.contains_key(l));
        if conf.bsp2_follow_1 && !type1_line.is_some_and(|l| self.points.contains_key(&l)) {
            return Ok(());
        }

        let retrace = ctx.lines[anchor].amp() / ctx.lines[break_line].amp();
        if retrace <= conf.max_bs2_rate {
            self.add(ctx, SignalType::T2, anchor, related, true, None);
        } else if conf.bsp2s_follow_2 {
            return Ok(());
        }
        if !self.config.side(seg.is_down()).targets(SignalType::T2S) {
            return Ok(());
        }
        self.type2s(ctx, anchor, break_line, related, &conf)
    }

    /// Every second line after a type-2 anchor that keeps overlapping it
    /// without passing the breakout extreme.
    fn type2s<L: Line>(
        &mut self,
        ctx: &Ctx<'_, L>,
        anchor: usize,
        break_line: usize,
        related: Option<usize>,
        conf: &PointConfig,
    ) -> ChanResult<()> {
        let (first, brk) = (&ctx.lines[anchor], &ctx.lines[break_line]);
        let anchor_seg = ctx.seg_idx_of(anchor)?;
        let mut band = (first.low(), first.high());
        let mut bias = 2;
        while anchor + bias < ctx.lines.len() {
            let i = anchor + bias;
            let cand = &ctx.lines[i];
            let cand_seg = ctx.seg_idx_of(i)?;
            if conf.max_bsp2s_level.is_some_and(|max| bias / 2 > max) {
                break;
            }
            if cand_seg != anchor_seg
                && (cand_seg + 1 < ctx.segs.len()
                    || cand_seg.saturating_sub(anchor_seg) >= 2
                    || ctx.segs.get(anchor_seg).is_some_and(|s| s.is_sure()))
            {
                break;
            }
            if !has_overlap(band.0, band.1, cand.low(), cand.high(), false) {
                break;
            }
            if bias == 2 {
                band = (first.low().max(cand.low()), first.high().min(cand.high()));
            }
            let passes_breakout = (cand.is_down() && cand.low() < brk.low())
                || (cand.is_up() && cand.high() > brk.high());
            if passes_breakout {
                break;
            }
            let retrace = (cand.end_val() - brk.end_val()).abs() / brk.amp();
            if retrace > conf.max_bs2_rate {
                break;
            }
            self.add(ctx, SignalType::T2S, i, related, true, None);
            bias += 2;
        }
        Ok(())
    }

    // ─── Type 3 ─────────────────────────────────────────────────────

    fn cal_type3<L: Line>(&mut self, ctx: &Ctx<'_, L>) -> ChanResult<()> {
        for seg in self.pending_segs(ctx) {
            if !self.seg_need_cal(seg) {
                continue;
            }
            let conf = self.config.side(seg.is_down());
            if !conf.targets(SignalType::T3A) && !conf.targets(SignalType::T3B) {
                continue;
            }
            let (conf, type1_line, next_seg, next_seg_idx) = if ctx.segs.len() > 1 {
                (
                    conf.clone(),
                    Some(seg.end()),
                    ctx.segs.get(seg.idx() + 1),
                    seg.idx() + 1,
                )
            } else {
                (self.config.side(seg.is_up()).clone(), None, Some(seg), seg.idx())
            };
            let related = type1_line.filter(|l| self.type1.contains_key(l));
            if conf.bsp3_follow_1 && !type1_line.is_some_and(|l| self.points.contains_key(&l)) {
                continue;
            }
            if let Some(next) = next_seg {
                self.type3_after(ctx, next, &conf, related, type1_line, next_seg_idx);
            }
            self.type3_before(ctx, seg, next_seg, type1_line, &conf, related, next_seg_idx)?;
        }
        Ok(())
    }

    /// Pullback right after the exit of the first pivot of the following segment.
    fn type3_after<L: Line>(
        &mut self,
        ctx: &Ctx<'_, L>,
        next_seg: &Segment,
        conf: &PointConfig,
        related: Option<usize>,
        type1_line: Option<usize>,
        next_seg_idx: usize,
    ) {
        let Some(pivot) = next_seg.first_multi_line_pivot(ctx.pivots) else {
            return;
        };
        if conf.strict_bsp3 && pivot.line_in() != Some(type1_line.map_or(0, |l| l + 1)) {
            return;
        }
        let Some(out) = pivot.line_out() else {
            return;
        };
        let i = out + 1;
        let Some(cand) = ctx.lines.get(i) else {
            return;
        };
        match cand.parent_seg() {
            None if next_seg.idx() + 1 != ctx.segs.len() => return,
            Some(p) if p != next_seg.idx() => {
                if ctx.segs.get(p).map_or(true, |s| s.line_count() >= 3) {
                    return;
                }
            }
            _ => {}
        }
        if cand.dir() == next_seg.dir() {
            return;
        }
        if cand.seg_idx() != Some(next_seg_idx) && next_seg_idx + 2 < ctx.segs.len() {
            return;
        }
        if returns_into(cand, pivot) {
            return;
        }
        if conf.bsp3_peak && !passes_peak(cand, pivot) {
            return;
        }
        self.add(ctx, SignalType::T3A, i, related, true, None);
    }

    /// First pullback after the type-1 anchor that stays outside the pivot
    /// the anchor left.
    #[allow(clippy::too_many_arguments)]
    fn type3_before<L: Line>(
        &mut self,
        ctx: &Ctx<'_, L>,
        seg: &Segment,
        next_seg: Option<&Segment>,
        type1_line: Option<usize>,
        conf: &PointConfig,
        related: Option<usize>,
        next_seg_idx: usize,
    ) -> ChanResult<()> {
        let Some(pivot) = seg.final_multi_line_pivot(ctx.pivots) else {
            return Ok(());
        };
        let Some(type1_line) = type1_line else {
            return Ok(());
        };
        if conf.strict_bsp3 && pivot.line_out() != Some(type1_line) {
            return Ok(());
        }
        let end_line = type3_search_end(ctx, next_seg);
        for i in (type1_line + 2..ctx.lines.len()).step_by(2) {
            if end_line.is_some_and(|e| i > e) {
                break;
            }
            let seg_idx = ctx.seg_idx_of(i)?;
            if seg_idx != next_seg_idx && seg_idx + 1 < ctx.segs.len() {
                break;
            }
            if returns_into(&ctx.lines[i], pivot) {
                continue;
            }
            self.add(ctx, SignalType::T3B, i, related, true, None);
            break;
        }
        Ok(())
    }
}

/// Last line a type-3B search may reach; `None` means unbounded.
fn type3_search_end<L>(ctx: &Ctx<'_, L>, next_seg: Option<&Segment>) -> Option<usize> {
    let next = next_seg?;
    if next.multi_line_pivot_count(ctx.pivots) == 0 && ctx.segs.get(next.idx() + 1).is_none() {
        return None;
    }
    let exit = next
        .pivots()
        .iter()
        .filter_map(|&i| ctx.pivots.get(i))
        .filter(|p| !p.is_one_line())
        .find_map(|p| p.line_out());
    Some(exit.unwrap_or_else(|| next.end().saturating_sub(1)))
}

fn returns_into<L: Line>(line: &L, pivot: &Pivot) -> bool {
    (line.is_down() && line.low() < pivot.high()) || (line.is_up() && line.high() > pivot.low())
}

fn passes_peak<L: Line>(line: &L, pivot: &Pivot) -> bool {
    (line.is_down() && line.high() >= pivot.peak_high())
        || (line.is_up() && line.low() <= pivot.peak_low())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PivotConfig, SegmentConfig};
    use crate::line::testing::{zigzag, TestLine};
    use crate::metric::MetricAlgo;
    use crate::pivot::PivotList;
    use crate::segment::SegmentList;

    fn amp_config() -> SignalConfig {
        let side = PointConfig {
            metric: MetricAlgo::Amp,
            ..PointConfig::default()
        };
        SignalConfig {
            buy: side.clone(),
            sell: side,
        }
    }

    fn classify(points: &[f64], config: SignalConfig) -> (Vec<TestLine>, SignalList) {
        let mut lines = zigzag(points);
        let mut segs = SegmentList::new(SegmentConfig::default());
        segs.cal(&mut lines, None).unwrap();
        let mut pivots = PivotList::new(PivotConfig::default());
        pivots.cal(&lines, segs.segments());
        pivots.assign_to_segments(&lines, segs.segments_mut()).unwrap();
        let mut signals = SignalList::new(config);
        signals
            .cal(&lines, segs.segments(), pivots.pivots(), &[])
            .unwrap();
        (lines, signals)
    }

    /// Up segment to 30, then a falling segment with a pivot on lines 6..=10
    /// that line 11 leaves, followed by a shallow rebound.
    const PIVOT_EXIT: [f64; 15] = [
        10.0, 20.0, 15.0, 25.0, 20.0, 30.0, 22.0, 27.0, 18.0, 23.0, 14.0, 22.5, 12.0, 17.0, 13.0,
    ];

    #[test]
    fn range_divergence_without_pivot_exit() {
        let (_, signals) = classify(
            &[10.0, 20.0, 15.0, 25.0, 20.0, 30.0, 22.0, 27.0, 18.0, 23.0, 14.0, 19.0, 12.0],
            amp_config(),
        );
        let points: Vec<_> = signals.points().collect();
        assert_eq!(points.len(), 1);
        let p = points[0];
        assert_eq!(p.line(), 11);
        assert!(p.is_buy());
        assert_eq!(p.types(), &[SignalType::T1P]);
        let expected = (7.0 / 19.0) / (9.0 / 23.0 + 1e-7);
        assert!((p.divergence_rate().unwrap() - expected).abs() < 1e-9);
        // the first segment's ending is a candidate but has no pivot
        assert_eq!(signals.type1_lines().collect::<Vec<_>>(), vec![4, 11]);
    }

    #[test]
    fn type1_at_pivot_exit_then_type2() {
        let (_, signals) = classify(&PIVOT_EXIT, amp_config());
        let t1 = signals.get(11).unwrap();
        assert_eq!(t1.types(), &[SignalType::T1]);
        assert!(t1.is_buy());
        let expected = (10.5 / 22.5) / (8.0 / 30.0);
        assert!((t1.divergence_rate().unwrap() - expected).abs() < 1e-9);

        let t2 = signals.get(13).unwrap();
        assert_eq!(t2.types(), &[SignalType::T2]);
        assert_eq!(t2.related_type1(), Some(11));
        assert_eq!(signals.len(), 2);
    }

    #[test]
    fn strict_divergence_rate_rejects_type1_and_its_followers() {
        let mut config = amp_config();
        config.buy.divergence_rate = 1.5;
        let (_, signals) = classify(&PIVOT_EXIT, config);
        assert!(signals.is_empty());
        assert!(signals.type1_lines().any(|l| l == 11));
    }

    #[test]
    fn unfollowed_type2_is_allowed_when_configured() {
        let mut config = amp_config();
        config.buy.divergence_rate = 1.5;
        config.buy.bsp2_follow_1 = false;
        let (_, signals) = classify(&PIVOT_EXIT, config);
        let t2 = signals.get(13).unwrap();
        assert_eq!(t2.types(), &[SignalType::T2]);
        assert_eq!(t2.related_type1(), Some(11));
    }

    #[test]
    fn recompute_keeps_the_same_points() {
        let mut lines = zigzag(&PIVOT_EXIT);
        let mut segs = SegmentList::new(SegmentConfig::default());
        segs.cal(&mut lines, None).unwrap();
        let mut pivots = PivotList::new(PivotConfig::default());
        pivots.cal(&lines, segs.segments());
        pivots.assign_to_segments(&lines, segs.segments_mut()).unwrap();
        let mut signals = SignalList::new(amp_config());
        signals.cal(&lines, segs.segments(), pivots.pivots(), &[]).unwrap();
        let first: Vec<_> = signals.points().cloned().collect();
        signals.cal(&lines, segs.segments(), pivots.pivots(), &[]).unwrap();
        assert_eq!(signals.points().cloned().collect::<Vec<_>>(), first);
    }
}
