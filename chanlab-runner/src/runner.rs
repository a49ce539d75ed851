//! Analysis runner: bars in, structures and signal listings out.
//!
//! Two entry points:
//! - `analyze()`: one symbol, one coordinator run over all of its levels.
//! - `analyze_many()`: independent symbols in parallel on the rayon pool.

use std::path::PathBuf;

use chanlab_core::fingerprint::RunFingerprint;
use chanlab_core::{
    Bar, Chan, ChanConfig, ChanError, ConfigError, Level, LevelSnapshot, Line, Period,
    SignalPoint,
};
use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::data_loader::{load_csv, LoadError};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("analysis error: {0}")]
    Analysis(#[from] ChanError),
    #[error("{feeds} bar feeds given for {levels} levels")]
    FeedCount { feeds: usize, levels: usize },
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Bars of one symbol, one feed per level, coarsest first.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub periods: Vec<Period>,
    pub feeds: Vec<Vec<Bar>>,
}

impl AnalysisRequest {
    pub fn new(symbol: impl Into<String>, periods: Vec<Period>, feeds: Vec<Vec<Bar>>) -> Self {
        Self {
            symbol: symbol.into(),
            periods,
            feeds,
        }
    }

    /// Load one CSV file per level.
    pub fn from_files(
        symbol: impl Into<String>,
        periods: Vec<Period>,
        paths: &[PathBuf],
    ) -> Result<Self, RunError> {
        let feeds = paths.iter().map(load_csv).collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(symbol, periods, feeds))
    }

    fn check(&self) -> Result<(), RunError> {
        if self.feeds.is_empty() || self.feeds.len() > self.periods.len() {
            return Err(RunError::FeedCount {
                feeds: self.feeds.len(),
                levels: self.periods.len(),
            });
        }
        Ok(())
    }
}

/// Which line level a signal point was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Stroke,
    Segment,
}

impl LineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LineKind::Stroke => "stroke",
            LineKind::Segment => "segment",
        }
    }
}

/// One signal point resolved to a time and price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub period: Period,
    pub kind: LineKind,
    /// Anchor line index within its level.
    pub line: usize,
    pub time: NaiveDateTime,
    /// End value of the anchor line.
    pub price: f64,
    pub is_buy: bool,
    pub types: String,
    pub divergence_rate: Option<f64>,
    /// Whether the anchor line is confirmed.
    pub sure: bool,
}

/// Complete result of one symbol's analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub fingerprint: RunFingerprint,
    pub misalign_count: usize,
    pub inconsistent_count: usize,
    pub levels: Vec<LevelSnapshot>,
    /// Signal points of every level, stroke points before segment points.
    pub signals: Vec<SignalRow>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl AnalysisResult {
    pub fn symbol(&self) -> &str {
        &self.fingerprint.symbol
    }

    pub fn level(&self, period: Period) -> Option<&LevelSnapshot> {
        self.levels.iter().find(|l| l.period == period)
    }
}

fn signal_rows<'a, L: Line>(
    level: &Level,
    kind: LineKind,
    lines: &[L],
    points: impl Iterator<Item = &'a SignalPoint>,
) -> Vec<SignalRow> {
    points
        .filter_map(|p| {
            let line = lines.get(p.line())?;
            let unit = level.units().get(p.unit())?;
            Some(SignalRow {
                period: level.period(),
                kind,
                line: p.line(),
                time: unit.time(),
                price: line.end_val(),
                is_buy: p.is_buy(),
                types: p.type_label(),
                divergence_rate: p.divergence_rate(),
                sure: line.is_sure(),
            })
        })
        .collect()
}

fn collect_signals(level: &Level) -> Vec<SignalRow> {
    let points = level.signals().points();
    let mut rows = signal_rows(level, LineKind::Stroke, level.strokes(), points);
    let points = level.seg_signals().points();
    rows.extend(signal_rows(level, LineKind::Segment, level.segments(), points));
    rows
}

/// Run every level of one symbol through the coordinator.
pub fn analyze(request: &AnalysisRequest, config: &ChanConfig) -> Result<AnalysisResult, RunError> {
    request.check()?;
    let fingerprint = RunFingerprint::new(
        request.symbol.clone(),
        request.periods.clone(),
        config,
        &request.feeds,
    )?;

    let mut chan = Chan::new(request.periods.clone(), config.clone())?;
    chan.run(request.feeds.clone())?;

    let levels: Vec<LevelSnapshot> = chan.levels().iter().map(Level::snapshot).collect();
    let signals: Vec<SignalRow> = chan.levels().iter().flat_map(collect_signals).collect();
    info!(
        symbol = %request.symbol,
        levels = levels.len(),
        strokes = levels.first().map_or(0, |l| l.strokes.len()),
        signals = signals.len(),
        "analysis complete"
    );

    Ok(AnalysisResult {
        schema_version: SCHEMA_VERSION,
        fingerprint,
        misalign_count: chan.misalign_count(),
        inconsistent_count: chan.inconsistent_count(),
        levels,
        signals,
    })
}

/// Analyze independent symbols in parallel.
///
/// One failing symbol does not stop the others; results come back in
/// request order.
pub fn analyze_many(
    requests: &[AnalysisRequest],
    config: &ChanConfig,
) -> Vec<(String, Result<AnalysisResult, RunError>)> {
    requests
        .par_iter()
        .map(|r| (r.symbol.clone(), analyze(r, config)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{multi_level, random_walk, SynthOptions};

    fn daily(seed: u64) -> Vec<Bar> {
        random_walk(300, Period::Day, seed, &SynthOptions::default()).unwrap()
    }

    #[test]
    fn analysis_is_deterministic() {
        let request = AnalysisRequest::new("AAA", vec![Period::Day], vec![daily(1)]);
        let config = ChanConfig::default();
        let a = analyze(&request, &config).unwrap();
        let b = analyze(&request, &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.symbol(), "AAA");
        assert_eq!(a.levels[0].unit_count, 300);
        assert!(!a.levels[0].strokes.is_empty());
    }

    #[test]
    fn signal_rows_point_at_their_anchor() {
        let request = AnalysisRequest::new("AAA", vec![Period::Day], vec![daily(5)]);
        let result = analyze(&request, &ChanConfig::default()).unwrap();
        let level = &result.levels[0];
        for row in &result.signals {
            let end = match row.kind {
                LineKind::Stroke => level.strokes[row.line].end_val(),
                LineKind::Segment => level.segments[row.line].end_val(),
            };
            assert_eq!(row.price, end);
            assert!(!row.types.is_empty());
        }
    }

    #[test]
    fn feed_count_is_checked() {
        let request = AnalysisRequest::new("AAA", vec![Period::Day], vec![daily(1), daily(2)]);
        assert!(matches!(
            analyze(&request, &ChanConfig::default()),
            Err(RunError::FeedCount { feeds: 2, levels: 1 })
        ));
        let request = AnalysisRequest::new("AAA", vec![Period::Day], vec![]);
        assert!(matches!(
            analyze(&request, &ChanConfig::default()),
            Err(RunError::FeedCount { feeds: 0, .. })
        ));
    }

    #[test]
    fn pipeline_errors_surface() {
        let mut bars = daily(1);
        bars.swap(10, 11);
        let request = AnalysisRequest::new("AAA", vec![Period::Day], vec![bars]);
        assert!(matches!(
            analyze(&request, &ChanConfig::default()),
            Err(RunError::Analysis(ChanError::Monotonicity { .. }))
        ));
    }

    #[test]
    fn parallel_matches_sequential() {
        let periods = vec![Period::Day, Period::Min60];
        let requests: Vec<AnalysisRequest> = (0..4)
            .map(|seed| {
                let feeds = multi_level(40, &periods, seed, &SynthOptions::default()).unwrap();
                AnalysisRequest::new(format!("S{seed}"), periods.clone(), feeds)
            })
            .collect();
        let config = ChanConfig::default();
        let many = analyze_many(&requests, &config);
        assert_eq!(many.len(), 4);
        for ((symbol, result), request) in many.iter().zip(&requests) {
            assert_eq!(symbol, &request.symbol);
            let result = result.as_ref().unwrap();
            assert_eq!(result, &analyze(request, &config).unwrap());
            assert_eq!(result.misalign_count, 0);
            assert_eq!(result.inconsistent_count, 0);
        }
    }
}
