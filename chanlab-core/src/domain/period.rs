//! Bar periods, ordered from finest to coarsest.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Timeframe of a level. `Ord` follows duration, so `Day > Min60`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Min60,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Period {
    /// Daily or finer. Date consistency between parent and child bars is only
    /// checked when both levels satisfy this.
    pub fn lte_day(self) -> bool {
        self <= Period::Day
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Min1 => "1m",
            Period::Min3 => "3m",
            Period::Min5 => "5m",
            Period::Min15 => "15m",
            Period::Min30 => "30m",
            Period::Min60 => "60m",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Quarter => "quarter",
            Period::Year => "year",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "min1" => Ok(Period::Min1),
            "3m" | "min3" => Ok(Period::Min3),
            "5m" | "min5" => Ok(Period::Min5),
            "15m" | "min15" => Ok(Period::Min15),
            "30m" | "min30" => Ok(Period::Min30),
            "60m" | "1h" | "min60" => Ok(Period::Min60),
            "day" | "1d" | "d" => Ok(Period::Day),
            "week" | "1w" | "w" => Ok(Period::Week),
            "month" | "mon" => Ok(Period::Month),
            "quarter" | "q" => Ok(Period::Quarter),
            "year" | "y" => Ok(Period::Year),
            other => Err(ConfigError::UnknownName {
                kind: "period",
                name: other.to_string(),
            }),
        }
    }
}

/// Levels must be listed from the coarsest period to the finest, without repeats.
pub fn check_level_order(levels: &[Period]) -> Result<(), ConfigError> {
    for pair in levels.windows(2) {
        if pair[0] <= pair[1] {
            return Err(ConfigError::Conflict(format!(
                "levels must go from coarse to fine, got {} before {}",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}
