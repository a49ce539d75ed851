//! Seeded random-walk bars for demos, benches and tests.
//!
//! The same seed always yields the same series. Multi-level feeds are built
//! from one finest series: each coarser bar aggregates a fixed run of finer
//! bars and carries the time of the last one, so every fine bar falls inside
//! its parent and on the parent's date.

use chanlab_core::{Bar, Period};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("period {0} has no fixed length and cannot be synthesized")]
    Unsupported(Period),

    #[error("{coarse} is not a whole multiple of {fine}")]
    Uneven { coarse: Period, fine: Period },

    #[error("at least one period is required")]
    NoPeriods,
}

/// Random-walk shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthOptions {
    pub start: NaiveDateTime,
    pub start_price: f64,
    /// Largest close-to-close move, as a fraction of price.
    pub max_step: f64,
    /// Largest wick beyond the body, as a fraction of price.
    pub max_wick: f64,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2020, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            start_price: 100.0,
            max_step: 0.02,
            max_wick: 0.01,
        }
    }
}

/// Length in minutes of the fixed-length periods.
pub fn period_minutes(period: Period) -> Option<i64> {
    match period {
        Period::Min1 => Some(1),
        Period::Min3 => Some(3),
        Period::Min5 => Some(5),
        Period::Min15 => Some(15),
        Period::Min30 => Some(30),
        Period::Min60 => Some(60),
        Period::Day => Some(1440),
        Period::Week => Some(7 * 1440),
        Period::Month | Period::Quarter | Period::Year => None,
    }
}

/// `count` bars spaced `period` apart, the first at `opts.start`.
pub fn random_walk(
    count: usize,
    period: Period,
    seed: u64,
    opts: &SynthOptions,
) -> Result<Vec<Bar>, SynthError> {
    let minutes = period_minutes(period).ok_or(SynthError::Unsupported(period))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut close = opts.start_price;
    let bars = (0..count)
        .map(|i| {
            let open = close;
            let step = rng.gen_range(-opts.max_step..=opts.max_step);
            close = (open * (1.0 + step)).max(0.01);
            let top = open.max(close);
            let bottom = open.min(close);
            let high = top * (1.0 + rng.gen_range(0.0..=opts.max_wick));
            let low = bottom * (1.0 - rng.gen_range(0.0..=opts.max_wick));
            let volume = rng.gen_range(1_000.0..10_000.0_f64).round();
            Bar::new(
                opts.start + Duration::minutes(minutes * i as i64),
                open,
                high,
                low,
                close,
            )
            .with_volume(volume)
            .with_turnover(volume * close)
        })
        .collect();
    Ok(bars)
}

/// Merge consecutive runs of `ratio` bars into one, stamped with the last
/// bar's time. A trailing partial run is dropped.
pub fn aggregate(bars: &[Bar], ratio: usize) -> Vec<Bar> {
    bars.chunks_exact(ratio.max(1))
        .filter_map(|run| {
            let (first, last) = (run.first()?, run.last()?);
            let high = run.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            let low = run.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            let mut bar = Bar::new(last.time, first.open, high, low, last.close);
            bar.volume = run.iter().map(|b| b.volume).sum();
            bar.turnover = run.iter().map(|b| b.turnover).sum();
            Some(bar)
        })
        .collect()
}

/// Aligned feeds for `periods` (coarsest first), with `count` bars at the
/// coarsest level.
///
/// The finest series starts at midnight, so every daily run ends on the same
/// date it began.
pub fn multi_level(
    count: usize,
    periods: &[Period],
    seed: u64,
    opts: &SynthOptions,
) -> Result<Vec<Vec<Bar>>, SynthError> {
    let (&coarsest, &finest) = periods
        .first()
        .zip(periods.last())
        .ok_or(SynthError::NoPeriods)?;
    let fine_min = period_minutes(finest).ok_or(SynthError::Unsupported(finest))?;

    let mut ratios = Vec::with_capacity(periods.len());
    for &p in periods {
        let minutes = period_minutes(p).ok_or(SynthError::Unsupported(p))?;
        if minutes % fine_min != 0 {
            return Err(SynthError::Uneven {
                coarse: p,
                fine: finest,
            });
        }
        ratios.push((minutes / fine_min) as usize);
    }
    let top_ratio = ratios.first().copied().unwrap_or(1);
    tracing::debug!(%coarsest, %finest, top_ratio, "synthesizing aligned feeds");

    let fine = random_walk(count * top_ratio, finest, seed, opts)?;
    Ok(ratios.iter().map(|&r| aggregate(&fine, r)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_series() {
        let opts = SynthOptions::default();
        let a = random_walk(200, Period::Day, 42, &opts).unwrap();
        let b = random_walk(200, Period::Day, 42, &opts).unwrap();
        let c = random_walk(200, Period::Day, 43, &opts).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn bars_are_well_formed_and_ordered() {
        let bars = random_walk(500, Period::Min5, 7, &SynthOptions::default()).unwrap();
        for bar in &bars {
            assert!(bar.low <= bar.open.min(bar.close));
            assert!(bar.high >= bar.open.max(bar.close));
            assert!(bar.low > 0.0);
        }
        assert!(bars.windows(2).all(|w| w[0].time < w[1].time));
        assert_eq!(bars[1].time - bars[0].time, Duration::minutes(5));
    }

    #[test]
    fn coarse_bars_cover_their_run() {
        let opts = SynthOptions::default();
        let feeds = multi_level(10, &[Period::Day, Period::Min60], 3, &opts).unwrap();
        let (days, hours) = (&feeds[0], &feeds[1]);
        assert_eq!(days.len(), 10);
        assert_eq!(hours.len(), 240);
        for (d, run) in days.iter().zip(hours.chunks(24)) {
            assert_eq!(d.time, run[23].time);
            assert_eq!(d.time.date(), run[0].time.date());
            assert_eq!(d.open, run[0].open);
            assert_eq!(d.close, run[23].close);
            assert!(run.iter().all(|h| h.high <= d.high && h.low >= d.low));
        }
    }

    #[test]
    fn calendar_periods_are_rejected() {
        let opts = SynthOptions::default();
        assert!(matches!(
            random_walk(5, Period::Month, 1, &opts),
            Err(SynthError::Unsupported(Period::Month))
        ));
        assert!(matches!(
            multi_level(5, &[Period::Min60, Period::Min5, Period::Min3], 1, &opts),
            Err(SynthError::Uneven {
                coarse: Period::Min5,
                fine: Period::Min3
            })
        ));
        assert!(matches!(multi_level(5, &[], 1, &opts), Err(SynthError::NoPeriods)));
    }
}
