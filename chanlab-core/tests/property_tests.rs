//! Property tests for structural invariants.
//!
//! Uses proptest over random-walk bar series to verify:
//! 1. Merged bars never contain their neighbour
//! 2. Strokes alternate direction and start on a matching fractal
//! 3. Confirmed strokes respect the strict span
//! 4. Pivot members overlap the body, and the peak band covers the body
//! 5. At most one signal point per anchor line
//! 6. Step mode reproduces batch strokes, also for every replayed prefix

use chanlab_core::domain::FxType;
use chanlab_core::pivot::Pivot;
use chanlab_core::{Bar, Chan, ChanConfig, Direction, Level, Line, Period};
use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_walk(min: usize, max: usize) -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((-1.0..1.0_f64, 0.1..1.5_f64), min..max).prop_map(|steps| {
        let t0 = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut mid = 100.0;
        steps
            .into_iter()
            .enumerate()
            .map(|(i, (step, range))| {
                mid += step;
                let open = mid - step / 2.0;
                Bar::new(
                    t0 + Duration::days(i as i64),
                    open,
                    open.max(mid) + range / 2.0,
                    open.min(mid) - range / 2.0,
                    mid,
                )
            })
            .collect()
    })
}

fn batch(bars: &[Bar]) -> Chan {
    let mut chan = Chan::new(vec![Period::Day], ChanConfig::default()).unwrap();
    chan.run(vec![bars.to_vec()]).unwrap();
    chan
}

fn check_pivot<L: Line>(lines: &[L], pivot: &Pivot) -> Result<(), TestCaseError> {
    prop_assert!(pivot.peak_low() <= pivot.low());
    prop_assert!(pivot.peak_high() >= pivot.high());
    if pivot.sub_pivots().is_empty() {
        for i in pivot.members() {
            let line = &lines[i];
            prop_assert!(line.low() <= pivot.high() && line.high() >= pivot.low());
        }
    }
    for sub in pivot.sub_pivots() {
        check_pivot(lines, sub)?;
    }
    Ok(())
}

fn level(chan: &Chan) -> &Level {
    chan.level(0).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn merged_bars_are_not_contained(bars in arb_walk(20, 300)) {
        let chan = batch(&bars);
        for pair in level(&chan).bars().windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(!(a.high() >= b.high() && a.low() <= b.low()));
            prop_assert!(!(b.high() >= a.high() && b.low() <= a.low()));
        }
    }

    #[test]
    fn strokes_alternate_from_matching_fractals(bars in arb_walk(20, 300)) {
        let chan = batch(&bars);
        let level = level(&chan);
        let strokes = level.strokes();
        for pair in strokes.windows(2) {
            prop_assert_ne!(pair[0].dir(), pair[1].dir());
            prop_assert_eq!(pair[0].end(), pair[1].begin());
        }
        for stroke in strokes {
            let expected = match stroke.dir() {
                Direction::Up => FxType::Bottom,
                Direction::Down => FxType::Top,
            };
            prop_assert_eq!(level.bars()[stroke.begin()].fx(), expected);
            prop_assert!(stroke.begin_val() != stroke.end_val());
            if stroke.is_sure() {
                prop_assert!(stroke.end() >= stroke.begin() + 4);
            }
        }
    }

    #[test]
    fn pivots_overlap_their_members(bars in arb_walk(60, 400)) {
        let chan = batch(&bars);
        let level = level(&chan);
        for pivot in level.pivots() {
            check_pivot(level.strokes(), pivot)?;
        }
        for pivot in level.seg_pivots() {
            check_pivot(level.segments(), pivot)?;
        }
    }

    #[test]
    fn one_signal_per_anchor(bars in arb_walk(60, 400)) {
        let chan = batch(&bars);
        let level = level(&chan);
        for list in [level.signals(), level.seg_signals()] {
            let anchors: Vec<usize> = list.points().map(|p| p.line()).collect();
            prop_assert!(anchors.windows(2).all(|w| w[0] < w[1]));
            for point in list.points() {
                prop_assert!(!point.types().is_empty());
                let mut types = point.types().to_vec();
                types.sort();
                types.dedup();
                prop_assert_eq!(types.len(), point.types().len());
            }
        }
    }

    #[test]
    fn step_mode_matches_batch(bars in arb_walk(20, 300)) {
        let batch = batch(&bars);
        let config = ChanConfig { trigger_step: true, ..ChanConfig::default() };
        let mut step = Chan::new(vec![Period::Day], config).unwrap();
        step.run(vec![bars]).unwrap();
        prop_assert_eq!(level(&batch).strokes(), level(&step).strokes());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn replayed_prefix_matches_its_step(bars in arb_walk(40, 160), cut in 0.2..1.0_f64) {
        let n = ((bars.len() as f64) * cut) as usize;
        prop_assume!(n > 0);
        let config = ChanConfig { trigger_step: true, ..ChanConfig::default() };
        let mut step = Chan::new(vec![Period::Day], config).unwrap();
        let snap = step
            .step_iter(vec![bars.clone()])
            .unwrap()
            .nth(n - 1)
            .unwrap()
            .unwrap();
        let replay = batch(&bars[..n]);
        prop_assert_eq!(&snap.levels[0].strokes, &level(&replay).strokes().to_vec());
    }
}
