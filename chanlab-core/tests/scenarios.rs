//! End-to-end scenarios through the public coordinator API.
//!
//! 1. A clean up-swing then down-swing gives two confirmed strokes and nothing else
//! 2. Malformed bars are rejected or repaired depending on `autofix`
//! 3. Two levels link every fine bar to the coarse bar enclosing it
//! 4. Batch and step processing agree on every derived list

use chanlab_core::domain::FxType;
use chanlab_core::{Bar, Chan, ChanConfig, ChanError, Direction, Line, Period};
use chrono::{Duration, NaiveDate, NaiveDateTime};

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(15, 0, 0)
        .unwrap()
}

fn daily(hl: &[(f64, f64)]) -> Vec<Bar> {
    hl.iter()
        .enumerate()
        .map(|(i, &(h, l))| {
            let mid = (h + l) / 2.0;
            Bar::new(t0() + Duration::days(i as i64), mid, h, l, mid)
        })
        .collect()
}

/// Deterministic wave with two superimposed cycles.
fn wave(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            let mid = 100.0 + 12.0 * (x * 0.11).sin() + 4.0 * (x * 0.53).sin();
            Bar::new(t0() + Duration::days(i as i64), mid - 0.2, mid + 0.6, mid - 0.6, mid + 0.2)
        })
        .collect()
}

#[test]
fn clean_swing_gives_one_stroke_each_way() {
    let bars = daily(&[
        (12.0, 11.0),
        (11.0, 10.0),
        (12.0, 11.0),
        (13.0, 12.0),
        (14.0, 13.0),
        (15.0, 14.0),
        (14.0, 13.0),
        (13.0, 12.0),
        (12.0, 11.0),
        (11.0, 10.0),
        (12.0, 11.0),
    ]);
    let mut chan = Chan::new(vec![Period::Day], ChanConfig::default()).unwrap();
    chan.run(vec![bars]).unwrap();
    let level = chan.level(0).unwrap();

    let strokes = level.strokes();
    assert_eq!(strokes.len(), 2);
    assert!(strokes.iter().all(|s| s.is_sure()));
    assert_eq!(strokes[0].dir(), Direction::Up);
    assert_eq!(strokes[1].dir(), Direction::Down);
    assert_eq!((strokes[0].begin(), strokes[0].end()), (1, 5));
    assert_eq!((strokes[1].begin(), strokes[1].end()), (5, 9));
    assert_eq!(level.bars()[1].fx(), FxType::Bottom);
    assert_eq!(level.bars()[5].fx(), FxType::Top);

    assert!(level.pivots().is_empty());
    assert!(level.signals().is_empty());
    assert!(level.seg_signals().is_empty());
}

#[test]
fn malformed_bar_is_rejected_without_autofix() {
    // low above high
    let bad = Bar::new(t0(), 4.5, 4.0, 5.0, 4.5);
    let mut chan = Chan::new(vec![Period::Day], ChanConfig::default()).unwrap();
    let err = chan.run(vec![vec![bad]]).unwrap_err();
    assert!(matches!(err, ChanError::Data { .. }));
    assert!(chan.level(0).unwrap().units().is_empty());
}

#[test]
fn malformed_bar_is_repaired_with_autofix() {
    let bad = Bar::new(t0(), 4.5, 4.0, 5.0, 4.5);
    let mut config = ChanConfig::default();
    config.data.autofix = true;
    let mut chan = Chan::new(vec![Period::Day], config).unwrap();
    chan.run(vec![vec![bad]]).unwrap();
    let bar = &chan.level(0).unwrap().units()[0].bar;
    assert_eq!(bar.low, 4.0);
    assert!(bar.high >= bar.open.max(bar.close));
}

#[test]
fn fine_bars_link_to_their_enclosing_coarse_bar() {
    let days = wave(20);
    // eight 30-minute bars closing each day, the last at the daily close
    let halves: Vec<Bar> = days
        .iter()
        .flat_map(|d| {
            (0..8).map(move |k| {
                let mut b = d.clone();
                b.time = d.time - Duration::minutes(30 * (7 - k));
                b
            })
        })
        .collect();

    let mut chan = Chan::new(vec![Period::Day, Period::Min30], ChanConfig::default()).unwrap();
    chan.run(vec![days, halves]).unwrap();

    let coarse = chan.level_of(Period::Day).unwrap();
    let fine = chan.level_of(Period::Min30).unwrap();
    assert_eq!(fine.units().len(), 160);
    for (i, unit) in coarse.units().iter().enumerate() {
        assert_eq!(unit.children.len(), 8);
        for &c in &unit.children {
            assert_eq!(fine.units()[c].parent, Some(i));
            assert!(fine.units()[c].time() <= unit.time());
        }
    }
    assert_eq!(chan.misalign_count(), 0);
    assert_eq!(chan.inconsistent_count(), 0);
}

#[test]
fn batch_and_step_agree() {
    let bars = wave(400);

    let mut batch = Chan::new(vec![Period::Day], ChanConfig::default()).unwrap();
    batch.run(vec![bars.clone()]).unwrap();

    let config = ChanConfig {
        trigger_step: true,
        ..ChanConfig::default()
    };
    let mut step = Chan::new(vec![Period::Day], config).unwrap();
    let last = step
        .step_iter(vec![bars])
        .unwrap()
        .last()
        .unwrap()
        .unwrap();

    let b = batch.level(0).unwrap().snapshot();
    let s = &last.levels[0];
    assert!(!b.strokes.is_empty());
    assert_eq!(b.strokes, s.strokes);
    assert_eq!(b.segments, s.segments);
    assert_eq!(b.pivots, s.pivots);
    assert_eq!(b.signals, s.signals);
    assert_eq!(last.step, 400);
}

#[test]
fn confirmed_segments_follow_their_direction() {
    let mut chan = Chan::new(vec![Period::Day], ChanConfig::default()).unwrap();
    chan.run(vec![wave(600)]).unwrap();
    let level = chan.level(0).unwrap();
    assert!(!level.segments().is_empty());
    for seg in level.segments().iter().filter(|s| s.is_sure()) {
        assert!(seg.end() >= seg.start() + 2);
        match seg.dir() {
            Direction::Up => assert!(seg.end_val() > seg.begin_val()),
            Direction::Down => assert!(seg.end_val() < seg.begin_val()),
        }
    }
}
