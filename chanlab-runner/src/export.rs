//! Export of analysis results: JSON, CSV and a Markdown summary.
//!
//! - **JSON**: the full `AnalysisResult`, every level's structures included
//! - **CSV**: the signal listing and the stroke list of each level
//! - **Markdown**: per-level counts and the latest signal points
//!
//! Persisted manifests carry a `schema_version`. Newer versions are rejected
//! on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chanlab_core::{Line, LevelSnapshot};

use crate::runner::{AnalysisResult, SignalRow, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(result: &AnalysisResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize AnalysisResult to JSON")
}

/// Deserialize an `AnalysisResult`, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<AnalysisResult> {
    let result: AnalysisResult =
        serde_json::from_str(json).context("failed to deserialize AnalysisResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: period, kind, line, time, side, types, price, divergence_rate, sure
pub fn export_signals_csv(rows: &[SignalRow]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "period",
        "kind",
        "line",
        "time",
        "side",
        "types",
        "price",
        "divergence_rate",
        "sure",
    ])?;
    for r in rows {
        let side = if r.is_buy { "buy" } else { "sell" };
        wtr.write_record([
            r.period.to_string(),
            r.kind.as_str().to_string(),
            r.line.to_string(),
            r.time.format("%Y-%m-%d %H:%M:%S").to_string(),
            side.to_string(),
            r.types.clone(),
            format!("{:.6}", r.price),
            r.divergence_rate
                .map(|d| format!("{d:.6}"))
                .unwrap_or_default(),
            r.sure.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: idx, dir, begin, end, begin_val, end_val, sure, seg
pub fn export_strokes_csv(level: &LevelSnapshot) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["idx", "dir", "begin", "end", "begin_val", "end_val", "sure", "seg"])?;
    for s in &level.strokes {
        wtr.write_record([
            &s.idx().to_string(),
            &format!("{:?}", s.dir()).to_lowercase(),
            &s.begin().to_string(),
            &s.end().to_string(),
            &format!("{:.6}", s.begin_val()),
            &format!("{:.6}", s.end_val()),
            &s.is_sure().to_string(),
            &s.seg_idx().map(|i| i.to_string()).unwrap_or_default(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for one symbol.
///
/// Creates `{symbol}_{config hash prefix}/` under `output_dir` containing
/// `manifest.json`, `signals.csv`, `strokes_{period}.csv` per level and
/// `summary.md`. Returns the created directory.
pub fn save_artifacts(result: &AnalysisResult, output_dir: &Path) -> Result<PathBuf> {
    let hash = &result.fingerprint.config_hash.0;
    let dirname = format!("{}_{}", result.symbol(), &hash[..hash.len().min(12)]);
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("manifest.json"), export_json(result)?)?;
    std::fs::write(
        run_dir.join("signals.csv"),
        export_signals_csv(&result.signals)?,
    )?;
    for level in &result.levels {
        let name = format!("strokes_{}.csv", level.period);
        std::fs::write(run_dir.join(name), export_strokes_csv(level)?)?;
    }
    std::fs::write(run_dir.join("summary.md"), generate_summary(result))?;

    tracing::info!(dir = %run_dir.display(), "artifacts written");
    Ok(run_dir)
}

pub fn load_artifacts(dir: &Path) -> Result<AnalysisResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown summary ───────────────────────────────────────────────

/// Markdown overview: metadata, per-level structure counts, latest signals.
pub fn generate_summary(result: &AnalysisResult) -> String {
    let fp = &result.fingerprint;
    let mut md = String::with_capacity(1024);

    md.push_str(&format!("# {} structure summary\n\n", fp.symbol));
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    let span = |t: Option<chrono::NaiveDateTime>| t.map(|t| t.to_string()).unwrap_or_default();
    md.push_str(&format!("| First bar | {} |\n", span(fp.first_bar)));
    md.push_str(&format!("| Last bar | {} |\n", span(fp.last_bar)));
    md.push_str(&format!("| Config hash | {} |\n", fp.config_hash));
    md.push_str(&format!("| Dataset hash | {} |\n", fp.dataset_hash));
    md.push_str(&format!(
        "| Misaligned / inconsistent | {} / {} |\n\n",
        result.misalign_count, result.inconsistent_count
    ));

    md.push_str("## Levels\n\n");
    md.push_str("| Level | Bars | Merged | Strokes | Segments | Seg-segs | Pivots | Seg pivots | Signals | Seg signals |\n");
    md.push_str("| --- | ---: | ---: | ---: | ---: | ---: | ---: | ---: | ---: | ---: |\n");
    for l in &result.levels {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            l.period,
            l.unit_count,
            l.bars.len(),
            l.strokes.len(),
            l.segments.len(),
            l.segsegs.len(),
            l.pivots.len(),
            l.seg_pivots.len(),
            l.signals.len(),
            l.seg_signals.len(),
        ));
    }

    md.push_str("\n## Latest signals\n\n");
    if result.signals.is_empty() {
        md.push_str("None.\n");
        return md;
    }
    md.push_str("| Level | Line | Time | Side | Types | Price |\n");
    md.push_str("| --- | --- | --- | --- | --- | ---: |\n");
    let mut latest: Vec<&SignalRow> = result.signals.iter().collect();
    latest.sort_by_key(|r| std::cmp::Reverse(r.time));
    for r in latest.into_iter().take(10) {
        md.push_str(&format!(
            "| {} | {} #{} | {} | {} | {} | {:.4} |\n",
            r.period,
            r.kind.as_str(),
            r.line,
            r.time,
            if r.is_buy { "buy" } else { "sell" },
            r.types,
            r.price,
        ));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{analyze, AnalysisRequest, LineKind};
    use crate::synth::{random_walk, SynthOptions};
    use chanlab_core::{ChanConfig, Period};

    fn sample() -> AnalysisResult {
        let bars = random_walk(400, Period::Day, 9, &SynthOptions::default()).unwrap();
        let request = AnalysisRequest::new("TEST", vec![Period::Day], vec![bars]);
        analyze(&request, &ChanConfig::default()).unwrap()
    }

    #[test]
    fn json_round_trip_keeps_structures() {
        let result = sample();
        let back = import_json(&export_json(&result).unwrap()).unwrap();
        assert_eq!(back.fingerprint, result.fingerprint);
        assert_eq!(back.levels[0].strokes, result.levels[0].strokes);
        assert_eq!(back.signals.len(), result.signals.len());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut result = sample();
        result.schema_version = SCHEMA_VERSION + 1;
        let json = export_json(&result).unwrap();
        let err = import_json(&json).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version"));
    }

    #[test]
    fn signals_csv_has_one_row_per_point() {
        let row = SignalRow {
            period: Period::Day,
            kind: LineKind::Segment,
            line: 3,
            time: chrono::NaiveDate::from_ymd_opt(2024, 5, 6)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            price: 12.5,
            is_buy: true,
            types: "1,2s".into(),
            divergence_rate: None,
            sure: false,
        };
        let csv = export_signals_csv(&[row]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("period,kind,line,time"));
        assert_eq!(
            lines[1],
            "day,segment,3,2024-05-06 00:00:00,buy,\"1,2s\",12.500000,,false"
        );
    }

    #[test]
    fn strokes_csv_lists_every_stroke() {
        let result = sample();
        let csv = export_strokes_csv(&result.levels[0]).unwrap();
        assert_eq!(csv.lines().count(), result.levels[0].strokes.len() + 1);
    }

    #[test]
    fn summary_lists_levels() {
        let md = generate_summary(&sample());
        assert!(md.starts_with("# TEST structure summary"));
        assert!(md.contains("| day |"));
    }
}
