//! Typed pipeline configuration.
//!
//! One closed struct per component, validated once at construction and never
//! mutated mid-stream. Two input surfaces exist:
//! - nested TOML/JSON via serde (`deny_unknown_fields` on every section);
//! - a flat key/value map using the classic option names, including the
//!   `-buy`/`-sell`/`-segbuy`/`-segsell`/`-seg` suffix overrides for signal
//!   settings ([`ChanConfig::from_flat`]).

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::metric::MetricAlgo;
use crate::signal::SignalType;

// ─── Stroke ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrokeAlgo {
    /// Span rules apply.
    Normal,
    /// Any valid fractal pair forms a stroke, span is ignored.
    Fx,
}

/// How strictly a candidate end fractal must dominate the begin fractal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FxCheck {
    Strict,
    Loss,
    Half,
    Totally,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrokeConfig {
    pub algo: StrokeAlgo,
    /// Strict mode needs 4 merged bars of separation, relaxed mode 3 merged
    /// bars and 3 raw bars.
    pub strict: bool,
    pub fx_check: FxCheck,
    /// Count price gaps between merged bars towards the span.
    pub gap_as_kl: bool,
    pub end_is_peak: bool,
    pub allow_sub_peak: bool,
}

impl Default for StrokeConfig {
    fn default() -> Self {
        Self {
            algo: StrokeAlgo::Normal,
            strict: true,
            fx_check: FxCheck::Strict,
            gap_as_kl: false,
            end_is_peak: true,
            allow_sub_peak: true,
        }
    }
}

// ─── Segment ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegAlgo {
    /// Feature-sequence fractals.
    Chan,
    /// A segment ends where the next same-direction line breaks the extreme two lines back.
    Break,
    /// Three-line break pattern with a two-line follow-through.
    #[serde(alias = "1+1")]
    OnePlusOne,
}

/// Policy for lines left over after the last confirmed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeftMethod {
    Peak,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentConfig {
    pub algo: SegAlgo,
    pub left_method: LeftMethod,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            algo: SegAlgo::Chan,
            left_method: LeftMethod::Peak,
        }
    }
}

// ─── Pivot ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    /// Combine when body bands overlap.
    Zs,
    /// Combine when peak bands overlap.
    Peak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotAlgo {
    /// Pivots are built inside segment boundaries.
    Normal,
    /// Pivots ignore segment boundaries.
    OverSeg,
    /// `Normal` for confirmed segments, `OverSeg` for the unconfirmed tail.
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PivotConfig {
    pub need_combine: bool,
    pub combine_mode: CombineMode,
    /// Allow a single line to open a pivot.
    pub one_line_pivot: bool,
    pub algo: PivotAlgo,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            need_combine: true,
            combine_mode: CombineMode::Zs,
            one_line_pivot: false,
            algo: PivotAlgo::Normal,
        }
    }
}

// ─── Signal points ──────────────────────────────────────────────────

/// Per-side (buy or sell) signal classification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PointConfig {
    /// Exit metric must be `<= divergence_rate * entry metric`. Values above
    /// 100 accept any breaking exit.
    #[serde(with = "rate")]
    pub divergence_rate: f64,
    /// Minimum pivot count in the segment for a type-1 point. 0 disables the check.
    pub min_pivot_cnt: usize,
    pub bsp1_only_multi_line_pivot: bool,
    /// Retracement ceiling for type-2 points, at most 1.
    pub max_bs2_rate: f64,
    pub metric: MetricAlgo,
    /// The pivot exit line must be the extreme of the pivot.
    pub bs1_peak: bool,
    pub types: Vec<SignalType>,
    pub bsp2_follow_1: bool,
    pub bsp3_follow_1: bool,
    pub bsp3_peak: bool,
    pub bsp2s_follow_2: bool,
    pub max_bsp2s_level: Option<usize>,
    pub strict_bsp3: bool,
}

impl Default for PointConfig {
    fn default() -> Self {
        Self {
            divergence_rate: f64::INFINITY,
            min_pivot_cnt: 1,
            bsp1_only_multi_line_pivot: true,
            max_bs2_rate: 0.9999,
            metric: MetricAlgo::Peak,
            bs1_peak: true,
            types: SignalType::ALL.to_vec(),
            bsp2_follow_1: true,
            bsp3_follow_1: true,
            bsp3_peak: false,
            bsp2s_follow_2: false,
            max_bsp2s_level: None,
            strict_bsp3: false,
        }
    }
}

impl PointConfig {
    fn segment_default() -> Self {
        Self {
            metric: MetricAlgo::Slope,
            bsp1_only_multi_line_pivot: false,
            ..Self::default()
        }
    }

    pub fn targets(&self, ty: SignalType) -> bool {
        self.types.contains(&ty)
    }

    fn validate(&self, side: &str) -> Result<(), ConfigError> {
        if !(self.max_bs2_rate <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: format!("{side}.max_bs2_rate"),
                value: self.max_bs2_rate.to_string(),
            });
        }
        if self.divergence_rate.is_nan() {
            return Err(ConfigError::InvalidValue {
                key: format!("{side}.divergence_rate"),
                value: "NaN".into(),
            });
        }
        Ok(())
    }

    /// Apply one classic option name. Returns false for names this struct does not own.
    fn set(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "divergence_rate" => self.divergence_rate = parse_rate(key, value)?,
            "min_zs_cnt" => self.min_pivot_cnt = parse_min_count(key, value)?,
            "bsp1_only_multibi_zs" => self.bsp1_only_multi_line_pivot = parse_value(key, value)?,
            "max_bs2_rate" => self.max_bs2_rate = parse_value(key, value)?,
            "macd_algo" => self.metric = value.parse()?,
            "bs1_peak" => self.bs1_peak = parse_value(key, value)?,
            "bs_type" => self.types = SignalType::parse_list(value)?,
            "bsp2_follow_1" => self.bsp2_follow_1 = parse_value(key, value)?,
            "bsp3_follow_1" => self.bsp3_follow_1 = parse_value(key, value)?,
            "bsp3_peak" => self.bsp3_peak = parse_value(key, value)?,
            "bsp2s_follow_2" => self.bsp2s_follow_2 = parse_value(key, value)?,
            "max_bsp2s_lv" => {
                self.max_bsp2s_level = match value.trim() {
                    "" | "none" | "None" => None,
                    v => Some(parse_value(key, v)?),
                }
            }
            "strict_bsp3" => self.strict_bsp3 = parse_value(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Buy-side and sell-side settings for one line level.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalConfig {
    pub buy: PointConfig,
    pub sell: PointConfig,
}

impl SignalConfig {
    fn segment_default() -> Self {
        Self {
            buy: PointConfig::segment_default(),
            sell: PointConfig::segment_default(),
        }
    }

    pub fn side(&self, is_buy: bool) -> &PointConfig {
        if is_buy {
            &self.buy
        } else {
            &self.sell
        }
    }
}

// ─── Metrics and data checks ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MacdConfig {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdConfig {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Check parent/child alignment and date consistency across levels.
    pub check: bool,
    /// Parent bars without children tolerated before failing.
    pub max_misalign_cnt: usize,
    /// Parent bars with date-mismatched children tolerated before failing.
    pub max_inconsistent_cnt: usize,
    /// Repair bars whose low/high do not bound open/close.
    pub autofix: bool,
    pub print_warning: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            check: true,
            max_misalign_cnt: 2,
            max_inconsistent_cnt: 5,
            autofix: false,
            print_warning: true,
        }
    }
}

// ─── Root ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChanConfig {
    pub stroke: StrokeConfig,
    pub segment: SegmentConfig,
    pub pivot: PivotConfig,
    /// Signal points on strokes.
    pub signal: SignalConfig,
    /// Signal points on segments.
    pub seg_signal: SignalConfig,
    pub macd: MacdConfig,
    pub compute_rsi: bool,
    pub rsi_period: usize,
    pub data: DataConfig,
    /// Recompute after every bar and yield snapshots.
    pub trigger_step: bool,
    /// Suppress the first N snapshots in step mode.
    pub skip_step: usize,
}

impl Default for ChanConfig {
    fn default() -> Self {
        Self {
            stroke: StrokeConfig::default(),
            segment: SegmentConfig::default(),
            pivot: PivotConfig::default(),
            signal: SignalConfig::default(),
            seg_signal: SignalConfig::segment_default(),
            macd: MacdConfig::default(),
            compute_rsi: false,
            rsi_period: 14,
            data: DataConfig::default(),
            trigger_step: false,
            skip_step: 0,
        }
    }
}

impl ChanConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ChanConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build from classic flat option names.
    ///
    /// Bare signal options apply to every side of both line levels (the segment
    /// level then resets its metric to `slope` and drops the multi-line pivot
    /// requirement). Suffixed options override one side or one level afterwards.
    pub fn from_flat(entries: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = ChanConfig::default();
        let mut base = PointConfig::default();
        let mut seen_base = Vec::new();

        for (key, value) in entries {
            if base.set(key, value)? {
                seen_base.push(key.as_str());
            }
        }
        config.signal = SignalConfig {
            buy: base.clone(),
            sell: base.clone(),
        };
        let seg_base = PointConfig {
            metric: MetricAlgo::Slope,
            bsp1_only_multi_line_pivot: false,
            ..base
        };
        config.seg_signal = SignalConfig {
            buy: seg_base.clone(),
            sell: seg_base,
        };

        for (key, value) in entries {
            let key = key.as_str();
            if let Some(prop) = key.strip_suffix("-buy") {
                set_point(&mut config.signal.buy, key, prop, value)?;
            } else if let Some(prop) = key.strip_suffix("-sell") {
                set_point(&mut config.signal.sell, key, prop, value)?;
            } else if let Some(prop) = key.strip_suffix("-segbuy") {
                set_point(&mut config.seg_signal.buy, key, prop, value)?;
            } else if let Some(prop) = key.strip_suffix("-segsell") {
                set_point(&mut config.seg_signal.sell, key, prop, value)?;
            } else if let Some(prop) = key.strip_suffix("-seg") {
                set_point(&mut config.seg_signal.buy, key, prop, value)?;
                set_point(&mut config.seg_signal.sell, key, prop, value)?;
            } else if seen_base.contains(&key) {
                continue;
            } else if !config.set_general(key, value)? {
                return Err(ConfigError::UnknownKey(key.to_string()));
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn set_general(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "bi_algo" => self.stroke.algo = parse_named(key, value)?,
            "bi_strict" => self.stroke.strict = parse_value(key, value)?,
            "bi_fx_check" => self.stroke.fx_check = parse_named(key, value)?,
            "gap_as_kl" => self.stroke.gap_as_kl = parse_value(key, value)?,
            "bi_end_is_peak" => self.stroke.end_is_peak = parse_value(key, value)?,
            "bi_allow_sub_peak" => self.stroke.allow_sub_peak = parse_value(key, value)?,
            "seg_algo" => self.segment.algo = parse_named(key, value)?,
            "left_seg_method" => self.segment.left_method = parse_named(key, value)?,
            "zs_combine" => self.pivot.need_combine = parse_value(key, value)?,
            "zs_combine_mode" => self.pivot.combine_mode = parse_named(key, value)?,
            "one_bi_zs" => self.pivot.one_line_pivot = parse_value(key, value)?,
            "zs_algo" => self.pivot.algo = parse_named(key, value)?,
            "trigger_step" => self.trigger_step = parse_value(key, value)?,
            "skip_step" => self.skip_step = parse_value(key, value)?,
            "kl_data_check" => self.data.check = parse_value(key, value)?,
            "max_kl_misalgin_cnt" | "max_kl_misalign_cnt" => {
                self.data.max_misalign_cnt = parse_value(key, value)?
            }
            "max_kl_inconsistent_cnt" => self.data.max_inconsistent_cnt = parse_value(key, value)?,
            "autofix" => self.data.autofix = parse_value(key, value)?,
            "print_warning" => self.data.print_warning = parse_value(key, value)?,
            "cal_rsi" => self.compute_rsi = parse_value(key, value)?,
            "rsi_cycle" => self.rsi_period = parse_value(key, value)?,
            "macd_fast" => self.macd.fast = parse_value(key, value)?,
            "macd_slow" => self.macd.slow = parse_value(key, value)?,
            "macd_signal" => self.macd.signal = parse_value(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Reject values that are individually well-formed but unusable together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.signal.buy.validate("signal.buy")?;
        self.signal.sell.validate("signal.sell")?;
        self.seg_signal.buy.validate("seg_signal.buy")?;
        self.seg_signal.sell.validate("seg_signal.sell")?;
        if self.pivot.algo == PivotAlgo::OverSeg && self.pivot.one_line_pivot {
            return Err(ConfigError::Conflict(
                "pivot.one_line_pivot cannot be combined with pivot.algo = over_seg".into(),
            ));
        }
        for (key, v) in [
            ("macd.fast", self.macd.fast),
            ("macd.slow", self.macd.slow),
            ("macd.signal", self.macd.signal),
            ("rsi_period", self.rsi_period),
        ] {
            if v == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    value: "0".into(),
                });
            }
        }
        Ok(())
    }
}

fn set_point(
    point: &mut PointConfig,
    key: &str,
    prop: &str,
    value: &str,
) -> Result<(), ConfigError> {
    if point.set(prop, value)? {
        Ok(())
    } else {
        Err(ConfigError::UnknownKey(key.to_string()))
    }
}

// ─── Value parsing ──────────────────────────────────────────────────

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    let v = value.trim();
    let v = match v {
        "True" => "true",
        "False" => "false",
        other => other,
    };
    v.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_min_count(key: &str, value: &str) -> Result<usize, ConfigError> {
    let n: i64 = parse_value(key, value)?;
    Ok(n.max(0) as usize)
}

fn parse_rate(key: &str, value: &str) -> Result<f64, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
        _ => parse_value(key, value),
    }
}

/// Parse a snake_case enum name through serde so flat and nested inputs agree.
fn parse_named<T: for<'de> Deserialize<'de>>(key: &str, value: &str) -> Result<T, ConfigError> {
    let v = serde_json::Value::String(value.trim().to_string());
    serde_json::from_value(v).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Serde adapter writing infinite rates as `"inf"` so JSON can carry them.
mod rate {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_infinite() && *v > 0.0 {
            s.serialize_str("inf")
        } else {
            s.serialize_f64(*v)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Num(v) => Ok(v),
            Raw::Text(t) => super::parse_rate("divergence_rate", &t)
                .map_err(|e| serde::de::Error::custom(e.to_string())),
        }
    }
}
