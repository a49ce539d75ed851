//! Bar loading from CSV files.
//!
//! Expected header: `time,open,high,low,close` followed by any of the
//! optional columns `volume`, `turnover`, `turnrate`, in any order. Column
//! names are matched case-insensitively. Times are `YYYY-MM-DD`,
//! `YYYY-MM-DD HH:MM` or `YYYY-MM-DD HH:MM:SS`; a bare date is stamped at
//! midnight.
//!
//! Rows are returned in file order. Ordering and OHLC sanity are checked by
//! the pipeline, not here.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chanlab_core::Bar;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}: malformed CSV: {source}")]
    Csv {
        origin: String,
        #[source]
        source: csv::Error,
    },

    #[error("{origin}: missing column '{column}'")]
    MissingColumn { origin: String, column: &'static str },

    #[error("{origin}, row {row}: cannot parse time '{value}'")]
    BadTime {
        origin: String,
        row: usize,
        value: String,
    },

    #[error("{origin}, row {row}: column '{column}' is not a number: '{value}'")]
    BadNumber {
        origin: String,
        row: usize,
        column: &'static str,
        value: String,
    },
}

const TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a bar timestamp in any of the accepted layouts.
pub fn parse_time(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

struct Columns {
    time: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
    turnover: Option<usize>,
    turnrate: Option<usize>,
}

impl Columns {
    fn from_header(header: &csv::StringRecord, origin: &str) -> Result<Self, LoadError> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &'static str| {
            find(name).ok_or_else(|| LoadError::MissingColumn {
                origin: origin.to_string(),
                column: name,
            })
        };
        Ok(Self {
            time: require("time")?,
            open: require("open")?,
            high: require("high")?,
            low: require("low")?,
            close: require("close")?,
            volume: find("volume"),
            turnover: find("turnover"),
            turnrate: find("turnrate"),
        })
    }
}

/// Read bars from any CSV source. `origin` names the source in errors.
pub fn read_bars<R: Read>(reader: R, origin: &str) -> Result<Vec<Bar>, LoadError> {
    let csv_err = |source| LoadError::Csv {
        origin: origin.to_string(),
        source,
    };
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let cols = Columns::from_header(rdr.headers().map_err(csv_err)?, origin)?;

    let mut bars = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(csv_err)?;
        // header is row 1
        let row = i + 2;
        let field = |idx: usize| record.get(idx).unwrap_or("");
        let number = |idx: usize, column: &'static str| -> Result<f64, LoadError> {
            let value = field(idx);
            value.parse::<f64>().map_err(|_| LoadError::BadNumber {
                origin: origin.to_string(),
                row,
                column,
                value: value.to_string(),
            })
        };
        let optional = |idx: Option<usize>, column: &'static str| -> Result<Option<f64>, LoadError> {
            match idx.map(field) {
                None | Some("") => Ok(None),
                Some(_) => idx.map(|i| number(i, column)).transpose(),
            }
        };

        let time = parse_time(field(cols.time)).ok_or_else(|| LoadError::BadTime {
            origin: origin.to_string(),
            row,
            value: field(cols.time).to_string(),
        })?;
        let mut bar = Bar::new(
            time,
            number(cols.open, "open")?,
            number(cols.high, "high")?,
            number(cols.low, "low")?,
            number(cols.close, "close")?,
        );
        bar.volume = optional(cols.volume, "volume")?;
        bar.turnover = optional(cols.turnover, "turnover")?;
        bar.turnrate = optional(cols.turnrate, "turnrate")?;
        bars.push(bar);
    }
    Ok(bars)
}

pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>, LoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_bars(file, &path.display().to_string())
}

/// Write bars in the layout `read_bars` accepts. Optional columns are
/// written only when at least one bar carries them.
pub fn write_bars<W: Write>(writer: W, bars: &[Bar]) -> Result<(), csv::Error> {
    let has_volume = bars.iter().any(|b| b.volume.is_some());
    let has_turnover = bars.iter().any(|b| b.turnover.is_some());
    let has_turnrate = bars.iter().any(|b| b.turnrate.is_some());

    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec!["time", "open", "high", "low", "close"];
    let optional = [
        ("volume", has_volume),
        ("turnover", has_turnover),
        ("turnrate", has_turnrate),
    ];
    header.extend(optional.iter().filter(|(_, on)| *on).map(|(name, _)| *name));
    wtr.write_record(&header)?;

    let cell = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
    for b in bars {
        let mut row = vec![
            b.time.format("%Y-%m-%d %H:%M:%S").to_string(),
            b.open.to_string(),
            b.high.to_string(),
            b.low.to_string(),
            b.close.to_string(),
        ];
        if has_volume {
            row.push(cell(b.volume));
        }
        if has_turnover {
            row.push(cell(b.turnover));
        }
        if has_turnrate {
            row.push(cell(b.turnrate));
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dates_and_times() {
        let d = parse_time("2024-03-01").unwrap();
        assert_eq!(d.to_string(), "2024-03-01 00:00:00");
        let m = parse_time("2024-03-01 09:30").unwrap();
        assert_eq!(m.to_string(), "2024-03-01 09:30:00");
        let s = parse_time(" 2024-03-01 09:30:15 ").unwrap();
        assert_eq!(s.to_string(), "2024-03-01 09:30:15");
        assert!(parse_time("03/01/2024").is_none());
    }

    #[test]
    fn reads_required_and_optional_columns() {
        let data = "Time,Open,High,Low,Close,Volume\n\
                    2024-01-02,10,11,9,10.5,1000\n\
                    2024-01-03,10.5,12,10,11.5,\n";
        let bars = read_bars(data.as_bytes(), "inline").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].high, 11.0);
        assert_eq!(bars[0].volume, Some(1000.0));
        assert_eq!(bars[1].volume, None);
        assert_eq!(bars[1].turnover, None);
    }

    #[test]
    fn reports_missing_columns() {
        let err = read_bars("time,open,high,close\n".as_bytes(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn { column: "low", .. }));
    }

    #[test]
    fn reports_bad_rows_with_their_line() {
        let data = "time,open,high,low,close\n2024-01-02,1,2,0.5,1\n2024-01-03,1,x,0.5,1\n";
        let err = read_bars(data.as_bytes(), "inline").unwrap_err();
        match err {
            LoadError::BadNumber { row, column, .. } => {
                assert_eq!(row, 3);
                assert_eq!(column, "high");
            }
            other => panic!("unexpected error: {other}"),
        }

        let data = "time,open,high,low,close\nyesterday,1,2,0.5,1\n";
        assert!(matches!(
            read_bars(data.as_bytes(), "inline").unwrap_err(),
            LoadError::BadTime { row: 2, .. }
        ));
    }

    #[test]
    fn written_bars_read_back() {
        let t = parse_time("2024-01-02 09:30").unwrap();
        let bars = vec![
            Bar::new(t, 10.0, 10.5, 9.75, 10.25).with_turnover(1234.5),
            Bar::new(t + chrono::Duration::minutes(5), 10.25, 10.3, 10.0, 10.1),
        ];
        let mut buf = Vec::new();
        write_bars(&mut buf, &bars).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("time,open,high,low,close,turnover\n"));
        assert_eq!(read_bars(buf.as_slice(), "buffer").unwrap(), bars);
    }
}
