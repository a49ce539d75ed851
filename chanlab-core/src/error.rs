//! Error taxonomy for the structural pipeline.
//!
//! Data and configuration problems are surfaced to the caller immediately.
//! Alignment and time-consistency problems are counted by the coordinator and
//! only become errors once their configured threshold is reached.

use chrono::NaiveDateTime;

/// Invalid or unrecognized configuration, raised at construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("unknown {kind}: {name}")]
    UnknownName { kind: &'static str, name: String },

    #[error("{0}")]
    Conflict(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChanError {
    /// Bar OHLC invariant violated and autofix disabled.
    #[error("bad bar at {time}: {reason}")]
    Data { time: NaiveDateTime, reason: String },

    /// A level received a bar that is not strictly later than the previous one.
    #[error("level {level}: bar time {current} is not after {last}")]
    Monotonicity {
        level: usize,
        current: NaiveDateTime,
        last: NaiveDateTime,
    },

    /// Too many parent bars without any child bars.
    #[error("{count} parent bars had no child bars at level {level} (limit {limit})")]
    Alignment {
        level: usize,
        count: usize,
        limit: usize,
    },

    /// Too many parent/child date mismatches.
    #[error("{count} parent bars disagree with their child bar dates (limit {limit})")]
    TimeConsistency { count: usize, limit: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Internally unreachable state. Indicates a logic defect.
    #[error("structural invariant violated: {0}")]
    StructuralInvariant(String),
}

impl ChanError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        ChanError::StructuralInvariant(msg.into())
    }
}

pub type ChanResult<T> = Result<T, ChanError>;
