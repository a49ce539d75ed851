//! Bar merging and fractal detection.

pub mod combiner;
pub mod series;

pub use combiner::{AllowEqual, Combined};
pub use series::{Appended, BarSeries, BarUnit, MergedBar};
