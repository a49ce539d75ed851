//! ChanLab Core: incremental market-structure analysis.
//!
//! This crate turns ordered price bars into a hierarchical structure model:
//! - Bar merging under containment and fractal classification
//! - Strokes between fractals, with provisional ends in step mode
//! - Segments over strokes and segments-of-segments, via one generic builder
//! - Pivots (overlap zones) over both line levels, with combination
//! - Buy/sell signal points classified by divergence and pullbacks
//! - A multi-level coordinator that feeds finer levels inside coarser bars
//!
//! Batch and step processing of the same bars produce the same structures.

pub mod chan;
pub mod config;
pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod indicators;
pub mod level;
pub mod line;
pub mod merge;
pub mod metric;
pub mod pivot;
pub mod segment;
pub mod signal;
pub mod stroke;

pub use chan::{Chan, Snapshot, StepIter};
pub use config::ChanConfig;
pub use domain::{Bar, Direction, Period};
pub use error::{ChanError, ChanResult, ConfigError};
pub use level::{Level, LevelSnapshot};
pub use line::Line;
pub use signal::{SignalPoint, SignalType};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: the pipeline can move to, and be shared with, a
    /// worker thread.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Chan>();
        require_sync::<Chan>();
        require_send::<Level>();
        require_sync::<Level>();
        require_send::<Snapshot>();
        require_sync::<Snapshot>();
        require_send::<ChanConfig>();
        require_sync::<ChanConfig>();
        require_send::<ChanError>();
        require_sync::<ChanError>();

        require_send::<stroke::Stroke>();
        require_sync::<stroke::Stroke>();
        require_send::<segment::Segment>();
        require_sync::<segment::Segment>();
        require_send::<pivot::Pivot>();
        require_sync::<pivot::Pivot>();
        require_send::<SignalPoint>();
        require_sync::<SignalPoint>();
    }

    #[test]
    fn default_config_builds_a_pipeline() {
        let chan = Chan::new(vec![Period::Day, Period::Min30], ChanConfig::default()).unwrap();
        assert_eq!(chan.levels().len(), 2);
        assert!(chan.level(0).unwrap().strokes().is_empty());
    }
}
