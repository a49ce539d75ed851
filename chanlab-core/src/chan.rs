//! Multi-level coordinator.
//!
//! Levels are listed from the coarsest period to the finest. Every bar of a
//! level pulls in the bars of the next finer level up to and including its
//! own timestamp before the next coarse bar is read, so finer structure is
//! never behind the coarse bar that encloses it.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ChanConfig;
use crate::domain::period::check_level_order;
use crate::domain::{Bar, Period};
use crate::error::{ChanError, ChanResult, ConfigError};
use crate::level::{Level, LevelSnapshot};

#[derive(Debug, Clone)]
pub struct Chan {
    config: ChanConfig,
    levels: Vec<Level>,
    /// Last accepted bar time per level.
    last_time: Vec<Option<NaiveDateTime>>,
    /// A bar read past its parent's window, held for the next parent.
    pending: Vec<Option<Bar>>,
    misalign_cnt: usize,
    /// Parent bar time -> child bar times on a different date.
    inconsistent: BTreeMap<NaiveDateTime, Vec<NaiveDateTime>>,
}

/// State of every level after one coarse bar in step mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of coarse bars consumed so far, starting at 1.
    pub step: usize,
    pub time: Option<NaiveDateTime>,
    pub levels: Vec<LevelSnapshot>,
}

impl Chan {
    pub fn new(periods: Vec<Period>, config: ChanConfig) -> ChanResult<Self> {
        if periods.is_empty() {
            return Err(ConfigError::Conflict("at least one level is required".into()).into());
        }
        check_level_order(&periods)?;
        config.validate()?;
        let levels: Vec<Level> = periods.iter().map(|&p| Level::new(p, &config)).collect();
        let n = levels.len();
        Ok(Self {
            config,
            levels,
            last_time: vec![None; n],
            pending: vec![None; n],
            misalign_cnt: 0,
            inconsistent: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &ChanConfig {
        &self.config
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, idx: usize) -> Option<&Level> {
        self.levels.get(idx)
    }

    pub fn level_of(&self, period: Period) -> Option<&Level> {
        self.levels.iter().find(|l| l.period() == period)
    }

    pub fn misalign_count(&self) -> usize {
        self.misalign_cnt
    }

    pub fn inconsistent_count(&self) -> usize {
        self.inconsistent.len()
    }

    /// Ingest one bar into a single level, without cross-level linking.
    ///
    /// In step mode the top level is recomputed right away; in batch mode
    /// call [`Chan::recompute`] once the bars are in.
    pub fn feed_level(&mut self, level: usize, bar: Bar) -> ChanResult<()> {
        if level >= self.levels.len() {
            return Err(ConfigError::InvalidValue {
                key: "level".into(),
                value: level.to_string(),
            }
            .into());
        }
        let bar = self.accept(level, bar)?;
        let time = bar.time;
        self.levels[level].feed(bar)?;
        self.last_time[level] = Some(time);
        if level == 0 && self.config.trigger_step {
            self.levels[0].recompute()?;
        }
        Ok(())
    }

    /// Recompute every level's derived structures.
    pub fn recompute(&mut self) -> ChanResult<()> {
        for level in &mut self.levels {
            level.recompute()?;
        }
        Ok(())
    }

    /// Feed one bar sequence per level (coarsest first) and, in batch mode,
    /// derive every level once at the end. Feeds may be shorter than the
    /// level list; missing finer levels receive no bars.
    pub fn run<F: IntoIterator<Item = Bar>>(&mut self, feeds: Vec<F>) -> ChanResult<()> {
        let mut feeds = self.open_feeds(feeds)?;
        while self.advance(&mut feeds)? {}
        if !self.config.trigger_step {
            self.recompute()?;
        }
        info!(
            levels = self.levels.len(),
            bars = self.levels[0].units().len(),
            signals = self.levels[0].signals().len(),
            "run complete"
        );
        Ok(())
    }

    /// Step through the feeds one coarse bar at a time, recomputing after
    /// each and yielding a snapshot. The first `skip_step` snapshots are
    /// suppressed; if nothing was yielded, the final state is.
    pub fn step_iter<F: IntoIterator<Item = Bar>>(
        &mut self,
        feeds: Vec<F>,
    ) -> ChanResult<StepIter<'_, F::IntoIter>> {
        if !self.config.trigger_step {
            return Err(ConfigError::Conflict("step_iter requires trigger_step".into()).into());
        }
        let feeds = self.open_feeds(feeds)?;
        Ok(StepIter {
            chan: self,
            feeds,
            step: 0,
            yielded: false,
            done: false,
        })
    }

    pub fn snapshot(&self, step: usize) -> Snapshot {
        Snapshot {
            step,
            time: self.last_time[0],
            levels: self.levels.iter().map(Level::snapshot).collect(),
        }
    }

    fn open_feeds<F: IntoIterator<Item = Bar>>(
        &self,
        feeds: Vec<F>,
    ) -> ChanResult<Vec<Option<F::IntoIter>>> {
        if feeds.is_empty() || feeds.len() > self.levels.len() {
            return Err(ConfigError::Conflict(format!(
                "expected 1..={} bar feeds, got {}",
                self.levels.len(),
                feeds.len()
            ))
            .into());
        }
        let mut open: Vec<_> = feeds.into_iter().map(|f| Some(f.into_iter())).collect();
        open.resize_with(self.levels.len(), || None);
        Ok(open)
    }

    /// Consume one coarse bar together with its finer bars.
    fn advance<I: Iterator<Item = Bar>>(
        &mut self,
        feeds: &mut [Option<I>],
    ) -> ChanResult<bool> {
        let Some(bar) = self.pull(0, None, feeds)? else {
            return Ok(false);
        };
        self.ingest(0, bar, None, feeds)?;
        if self.config.trigger_step {
            self.levels[0].recompute()?;
        }
        Ok(true)
    }

    /// Next bar of `level`, unless it lies after `until`, in which case it is
    /// held back for the next window.
    fn pull<I: Iterator<Item = Bar>>(
        &mut self,
        level: usize,
        until: Option<NaiveDateTime>,
        feeds: &mut [Option<I>],
    ) -> ChanResult<Option<Bar>> {
        let bar = match self.pending[level].take() {
            Some(bar) => bar,
            None => {
                let Some(bar) = feeds[level].as_mut().and_then(Iterator::next) else {
                    return Ok(None);
                };
                self.check_monotonic(level, bar.time)?;
                bar
            }
        };
        if until.is_some_and(|t| bar.time > t) {
            self.pending[level] = Some(bar);
            return Ok(None);
        }
        Ok(Some(bar))
    }

    /// Fails unless `time` is after the last bar stored at `level`.
    fn check_monotonic(&self, level: usize, time: NaiveDateTime) -> ChanResult<()> {
        if let Some(last) = self.last_time[level] {
            if time <= last {
                return Err(ChanError::Monotonicity {
                    level,
                    current: time,
                    last,
                });
            }
        }
        Ok(())
    }

    /// Validate `bar` for `level` without touching any state. The caller
    /// records its time once the level has stored it.
    fn accept(&self, level: usize, mut bar: Bar) -> ChanResult<Bar> {
        self.check_monotonic(level, bar.time)?;
        bar.check(self.config.data.autofix)?;
        Ok(bar)
    }

    fn ingest<I: Iterator<Item = Bar>>(
        &mut self,
        level: usize,
        bar: Bar,
        parent: Option<usize>,
        feeds: &mut [Option<I>],
    ) -> ChanResult<()> {
        let bar = self.accept(level, bar)?;
        let time = bar.time;
        let unit = self.levels[level].feed(bar)?;
        self.last_time[level] = Some(time);
        if let Some(parent) = parent {
            self.link(level, parent, unit)?;
        }
        if level + 1 < self.levels.len() {
            let until = self.levels[level].units()[unit].time();
            while let Some(child) = self.pull(level + 1, Some(until), feeds)? {
                self.ingest(level + 1, child, Some(unit), feeds)?;
            }
            self.check_align(level, unit)?;
        }
        Ok(())
    }

    /// Link unit `child` of `level` to unit `parent` of the level above.
    fn link(&mut self, level: usize, parent: usize, child: usize) -> ChanResult<()> {
        let parent_time = self.levels[level - 1].units()[parent].time();
        let child_time = self.levels[level].units()[child].time();
        if self.config.data.check
            && self.levels[level].period().lte_day()
            && self.levels[level - 1].period().lte_day()
        {
            self.check_consistent(parent_time, child_time)?;
        }
        self.levels[level - 1].series_mut().units_mut()[parent]
            .children
            .push(child);
        self.levels[level].series_mut().units_mut()[child].parent = Some(parent);
        Ok(())
    }

    fn check_consistent(&mut self, parent: NaiveDateTime, child: NaiveDateTime) -> ChanResult<()> {
        if parent.date() == child.date() {
            return Ok(());
        }
        self.inconsistent.entry(parent).or_default().push(child);
        if self.config.data.print_warning {
            warn!(%parent, %child, "child bar falls on a different date than its parent");
        }
        let limit = self.config.data.max_inconsistent_cnt;
        if self.inconsistent.len() >= limit {
            return Err(ChanError::TimeConsistency {
                count: self.inconsistent.len(),
                limit,
            });
        }
        Ok(())
    }

    fn check_align(&mut self, level: usize, unit: usize) -> ChanResult<()> {
        let parent = &self.levels[level].units()[unit];
        if !self.config.data.check || !parent.children.is_empty() {
            return Ok(());
        }
        self.misalign_cnt += 1;
        if self.config.data.print_warning {
            warn!(
                time = %parent.time(),
                child_level = %self.levels[level + 1].period(),
                "no child bars found"
            );
        }
        let limit = self.config.data.max_misalign_cnt;
        if self.misalign_cnt >= limit {
            return Err(ChanError::Alignment {
                level: level + 1,
                count: self.misalign_cnt,
                limit,
            });
        }
        Ok(())
    }
}

/// Lazy step-mode driver returned by [`Chan::step_iter`].
pub struct StepIter<'a, I> {
    chan: &'a mut Chan,
    feeds: Vec<Option<I>>,
    step: usize,
    yielded: bool,
    done: bool,
}

impl<I: Iterator<Item = Bar>> Iterator for StepIter<'_, I> {
    type Item = ChanResult<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.chan.advance(&mut self.feeds) {
                Ok(true) => {
                    self.step += 1;
                    if self.step <= self.chan.config.skip_step {
                        continue;
                    }
                    self.yielded = true;
                    return Some(Ok(self.chan.snapshot(self.step)));
                }
                Ok(false) => {
                    self.done = true;
                    if !self.yielded {
                        self.yielded = true;
                        debug!(steps = self.step, "every step skipped, yielding final state");
                        return Some(Ok(self.chan.snapshot(self.step)));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
