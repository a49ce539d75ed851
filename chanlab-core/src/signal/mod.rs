//! Structural buy/sell signal points.

pub mod list;

pub use list::SignalList;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SignalType {
    /// Divergence out of the segment's final pivot.
    #[serde(rename = "1")]
    T1,
    /// Divergence without a qualifying pivot.
    #[serde(rename = "1p")]
    T1P,
    /// First pullback after a type-1 point.
    #[serde(rename = "2")]
    T2,
    /// Later pullbacks that stay in the type-2 range.
    #[serde(rename = "2s")]
    T2S,
    /// Pullback that stays outside the first pivot after a type-1 point.
    #[serde(rename = "3a")]
    T3A,
    /// Pullback that stays outside the pivot the type-1 point left.
    #[serde(rename = "3b")]
    T3B,
}

impl SignalType {
    pub const ALL: [SignalType; 6] = [
        SignalType::T1,
        SignalType::T1P,
        SignalType::T2,
        SignalType::T2S,
        SignalType::T3A,
        SignalType::T3B,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalType::T1 => "1",
            SignalType::T1P => "1p",
            SignalType::T2 => "2",
            SignalType::T2S => "2s",
            SignalType::T3A => "3a",
            SignalType::T3B => "3b",
        }
    }

    pub fn is_type1(self) -> bool {
        matches!(self, SignalType::T1 | SignalType::T1P)
    }

    /// Parse a comma separated list such as `"1,2,3a"`.
    pub fn parse_list(value: &str) -> Result<Vec<Self>, ConfigError> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "1" => SignalType::T1,
            "1p" => SignalType::T1P,
            "2" => SignalType::T2,
            "2s" => SignalType::T2S,
            "3a" => SignalType::T3A,
            "3b" => SignalType::T3B,
            _ => {
                return Err(ConfigError::UnknownName {
                    kind: "signal type",
                    name: s.to_string(),
                })
            }
        })
    }
}

/// A classified point at the end of one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPoint {
    line: usize,
    /// Raw bar index where the anchor line ends.
    unit: usize,
    is_buy: bool,
    types: Vec<SignalType>,
    /// Anchor line of the type-1 point this one follows.
    related_type1: Option<usize>,
    /// Exit/entry metric ratio for type-1 points.
    divergence_rate: Option<f64>,
}

impl SignalPoint {
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn unit(&self) -> usize {
        self.unit
    }

    pub fn is_buy(&self) -> bool {
        self.is_buy
    }

    pub fn types(&self) -> &[SignalType] {
        &self.types
    }

    pub fn has_type(&self, ty: SignalType) -> bool {
        self.types.contains(&ty)
    }

    pub fn related_type1(&self) -> Option<usize> {
        self.related_type1
    }

    pub fn divergence_rate(&self) -> Option<f64> {
        self.divergence_rate
    }

    /// Comma separated type tags, in the order they were assigned.
    pub fn type_label(&self) -> String {
        self.types
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}
