//! Streaming indicators attached to every raw bar as it enters a level.
//!
//! Unlike batch indicators these are fed one close at a time and return the
//! value for that bar, so a level can compute them inside its ingestion step
//! and batch and incremental runs see identical values.

pub mod macd;
pub mod rsi;

pub use macd::{Macd, MacdPoint};
pub use rsi::Rsi;

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
