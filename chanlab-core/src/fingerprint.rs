//! Result fingerprinting: deterministic identification of an analysis run.
//!
//! - `ConfigHash`: BLAKE3 of the canonical JSON form of a [`ChanConfig`].
//! - `DatasetHash`: BLAKE3 over the bar feeds, level by level.
//! - `RunFingerprint`: both hashes plus the level list, stored next to exported results.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::ChanConfig;
use crate::domain::{Bar, Period};
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHash(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash of every setting. Struct fields serialize in declaration order, so
/// the JSON form is canonical.
pub fn config_hash(config: &ChanConfig) -> Result<ConfigHash, ConfigError> {
    let json = serde_json::to_string(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(ConfigHash(blake3::hash(json.as_bytes()).to_hex().to_string()))
}

/// Hash of the bar feeds. Level boundaries are part of the input, so moving a
/// bar between levels changes the hash.
pub fn dataset_hash<'a, I>(feeds: I) -> DatasetHash
where
    I: IntoIterator<Item = &'a [Bar]>,
{
    let mut hasher = blake3::Hasher::new();
    for (level, bars) in feeds.into_iter().enumerate() {
        hasher.update(&(level as u64).to_le_bytes());
        hasher.update(&(bars.len() as u64).to_le_bytes());
        for bar in bars {
            hasher.update(&bar.time.and_utc().timestamp().to_le_bytes());
            for v in [bar.open, bar.high, bar.low, bar.close] {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            for v in [bar.volume, bar.turnover, bar.turnrate] {
                hasher.update(&v.map_or(u64::MAX, f64::to_bits).to_le_bytes());
            }
        }
    }
    DatasetHash(hasher.finalize().to_hex().to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub symbol: String,
    pub levels: Vec<Period>,
    pub first_bar: Option<NaiveDateTime>,
    pub last_bar: Option<NaiveDateTime>,
    pub config_hash: ConfigHash,
    pub dataset_hash: DatasetHash,
}

impl RunFingerprint {
    pub fn new(
        symbol: impl Into<String>,
        levels: Vec<Period>,
        config: &ChanConfig,
        feeds: &[Vec<Bar>],
    ) -> Result<Self, ConfigError> {
        let top = feeds.first();
        Ok(Self {
            symbol: symbol.into(),
            levels,
            first_bar: top.and_then(|b| b.first()).map(|b| b.time),
            last_bar: top.and_then(|b| b.last()).map(|b| b.time),
            config_hash: config_hash(config)?,
            dataset_hash: dataset_hash(feeds.iter().map(Vec::as_slice)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars() -> Vec<Bar> {
        let t = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        vec![Bar::new(t, 1.0, 2.0, 0.5, 1.5).with_volume(100.0)]
    }

    #[test]
    fn config_hash_tracks_values() {
        let a = ChanConfig::default();
        let mut b = ChanConfig::default();
        assert_eq!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
        b.stroke.strict = false;
        assert_ne!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    #[test]
    fn dataset_hash_sees_level_boundaries() {
        let one = bars();
        let empty: &[Bar] = &[];
        let a = dataset_hash([one.as_slice(), empty]);
        let b = dataset_hash([empty, one.as_slice()]);
        assert_ne!(a, b);
        assert_eq!(a, dataset_hash([one.as_slice(), empty]));
    }

    #[test]
    fn fingerprint_records_range() {
        let feeds = vec![bars()];
        let fp = RunFingerprint::new("TEST", vec![Period::Day], &ChanConfig::default(), &feeds).unwrap();
        assert_eq!(fp.first_bar, fp.last_bar);
        assert_eq!(fp.config_hash.0.len(), 64);
    }
}
