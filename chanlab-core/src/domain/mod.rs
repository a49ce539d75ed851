//! Domain types: raw bars, bar periods and the direction/fractal vocabulary.

pub mod bar;
pub mod kinds;
pub mod period;

pub use bar::Bar;
pub use kinds::{has_overlap, Direction, FxType, MergeDir};
pub use period::Period;
