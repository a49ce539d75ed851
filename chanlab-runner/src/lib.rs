//! ChanLab Runner: bar loading, analysis runs and result export.
//!
//! This crate builds on `chanlab-core` to provide:
//! - CSV bar loading with typed errors
//! - Config file loading and period list parsing
//! - Single-symbol analysis and parallel multi-symbol analysis
//! - Seeded synthetic bar feeds, aligned across levels
//! - JSON, CSV and Markdown artifacts with run fingerprints

pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;
pub mod synth;

pub use config::{load_config, parse_periods, ConfigLoadError};
pub use data_loader::{load_csv, read_bars, write_bars, LoadError};
pub use export::{export_json, export_signals_csv, import_json, load_artifacts, save_artifacts};
pub use runner::{
    analyze, analyze_many, AnalysisRequest, AnalysisResult, LineKind, RunError, SignalRow,
    SCHEMA_VERSION,
};
pub use synth::{multi_level, random_walk, SynthError, SynthOptions};
