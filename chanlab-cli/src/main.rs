//! ChanLab CLI: structure analysis, step replay and data commands.
//!
//! Commands:
//! - `analyze`: run every level of one symbol and save artifacts
//! - `scan`: analyze one file per symbol in parallel and print a table
//! - `step`: replay bars one coarse bar at a time and print each snapshot
//! - `synth`: write a seeded random-walk bar file
//! - `config`: print the default configuration as TOML

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chanlab_core::{Chan, ChanConfig, Period, Snapshot};
use chanlab_runner::{
    analyze, analyze_many, load_config, multi_level, parse_periods, save_artifacts, write_bars,
    AnalysisRequest, AnalysisResult, SynthOptions,
};

#[derive(Parser)]
#[command(name = "chanlab", about = "ChanLab CLI: multi-level market structure analysis")]
struct Cli {
    /// More log output (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one symbol, one CSV file per level (coarsest first).
    Analyze {
        /// Bar file; repeat once per level.
        #[arg(long = "bars", required = true)]
        bars: Vec<PathBuf>,

        /// Comma separated periods, coarsest first (e.g. day,30m).
        #[arg(long)]
        levels: Option<String>,

        /// Symbol name. Defaults to the first file's stem.
        #[arg(long)]
        symbol: Option<String>,

        /// TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        out: PathBuf,
    },
    /// Analyze many single-level files in parallel, one symbol per file.
    Scan {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Period of every file.
        #[arg(long, default_value = "day")]
        level: Period,

        #[arg(long)]
        config: Option<PathBuf>,

        /// Also save artifacts for each symbol here.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replay bars step by step and print every snapshot.
    Step {
        #[arg(long = "bars", required = true)]
        bars: Vec<PathBuf>,

        #[arg(long)]
        levels: Option<String>,

        #[arg(long)]
        config: Option<PathBuf>,

        /// Suppress the first N snapshots.
        #[arg(long)]
        skip: Option<usize>,

        /// Print full snapshots as JSON lines instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write a seeded random-walk bar file per level.
    Synth {
        /// Bars at the coarsest level.
        #[arg(long, default_value_t = 500)]
        count: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Comma separated periods, coarsest first.
        #[arg(long, default_value = "day")]
        levels: String,

        /// Output directory. A single level without it goes to stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Configuration helpers.
    Config {
        /// Print the default configuration as TOML.
        #[arg(long, default_value_t = false)]
        print_default: bool,

        /// Validate a config file and print it back with defaults filled in.
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Analyze {
            bars,
            levels,
            symbol,
            config,
            out,
        } => run_analyze(&bars, levels.as_deref(), symbol, config.as_deref(), &out),
        Commands::Scan {
            files,
            level,
            config,
            out,
        } => run_scan(&files, level, config.as_deref(), out.as_deref()),
        Commands::Step {
            bars,
            levels,
            config,
            skip,
            json,
        } => run_step(&bars, levels.as_deref(), config.as_deref(), skip, json),
        Commands::Synth {
            count,
            seed,
            levels,
            out,
        } => run_synth(count, seed, &levels, out.as_deref()),
        Commands::Config {
            print_default,
            check,
        } => run_config(print_default, check.as_deref()),
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn read_config(path: Option<&Path>) -> Result<ChanConfig> {
    match path {
        Some(p) => Ok(load_config(p)?),
        None => Ok(ChanConfig::default()),
    }
}

/// Periods for `files`: parsed from `levels`, or `day` for a single file.
fn resolve_levels(levels: Option<&str>, files: &[PathBuf]) -> Result<Vec<Period>> {
    let periods = match levels {
        Some(s) => parse_periods(s)?,
        None if files.len() == 1 => vec![Period::Day],
        None => bail!("--levels is required with more than one --bars file"),
    };
    if periods.len() != files.len() {
        bail!(
            "{} levels given for {} bar files",
            periods.len(),
            files.len()
        );
    }
    Ok(periods)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "symbol".to_string())
}

fn run_analyze(
    files: &[PathBuf],
    levels: Option<&str>,
    symbol: Option<String>,
    config_path: Option<&Path>,
    out: &Path,
) -> Result<()> {
    let periods = resolve_levels(levels, files)?;
    let config = read_config(config_path)?;
    let symbol = symbol.unwrap_or_else(|| file_stem(&files[0]));

    let request = AnalysisRequest::from_files(symbol, periods, files)?;
    let result = analyze(&request, &config)?;
    print_summary(&result);

    let run_dir = save_artifacts(&result, out)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn run_scan(
    files: &[PathBuf],
    level: Period,
    config_path: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let config = read_config(config_path)?;
    let requests = files
        .iter()
        .map(|f| AnalysisRequest::from_files(file_stem(f), vec![level], std::slice::from_ref(f)))
        .collect::<Result<Vec<_>, _>>()?;

    println!(
        "{:<12} {:>8} {:>8} {:>8} {:>8} {:>8}  last signal",
        "symbol", "bars", "strokes", "segs", "pivots", "signals"
    );
    let mut failed = 0;
    for (symbol, result) in analyze_many(&requests, &config) {
        match result {
            Ok(r) => {
                let l = &r.levels[0];
                let last = r
                    .signals
                    .iter()
                    .max_by_key(|s| s.time)
                    .map(|s| {
                        let side = if s.is_buy { "buy" } else { "sell" };
                        format!("{} {} {}", s.time, side, s.types)
                    })
                    .unwrap_or_default();
                println!(
                    "{:<12} {:>8} {:>8} {:>8} {:>8} {:>8}  {}",
                    symbol,
                    l.unit_count,
                    l.strokes.len(),
                    l.segments.len(),
                    l.pivots.len(),
                    r.signals.len(),
                    last
                );
                if let Some(dir) = out {
                    save_artifacts(&r, dir)?;
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!(%symbol, error = %e, "analysis failed");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} symbols failed", files.len());
    }
    Ok(())
}

fn run_step(
    files: &[PathBuf],
    levels: Option<&str>,
    config_path: Option<&Path>,
    skip: Option<usize>,
    json: bool,
) -> Result<()> {
    let periods = resolve_levels(levels, files)?;
    let mut config = read_config(config_path)?;
    config.trigger_step = true;
    if let Some(n) = skip {
        config.skip_step = n;
    }
    let request = AnalysisRequest::from_files("step", periods.clone(), files)?;
    tracing::debug!(skip_step = config.skip_step, "replaying in step mode");

    let mut chan = Chan::new(periods, config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for snapshot in chan.step_iter(request.feeds)? {
        let snapshot = snapshot?;
        if json {
            let line = serde_json::to_string(&snapshot).context("failed to serialize snapshot")?;
            writeln!(out, "{line}")?;
        } else {
            writeln!(out, "{}", step_line(&snapshot))?;
        }
    }
    Ok(())
}

fn step_line(snapshot: &Snapshot) -> String {
    let time = snapshot
        .time
        .map(|t| t.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!("#{:<6} {time}", snapshot.step);
    for level in &snapshot.levels {
        line.push_str(&format!(
            "  [{}] strokes={} segs={} pivots={} bsp={}",
            level.period,
            level.strokes.len(),
            level.segments.len(),
            level.pivots.len(),
            level.signals.len(),
        ));
        if let Some(p) = level.signals.last() {
            let side = if p.is_buy() { "buy" } else { "sell" };
            line.push_str(&format!(" last={side}:{}@{}", p.type_label(), p.line()));
        }
    }
    line
}

fn run_synth(count: usize, seed: u64, levels: &str, out: Option<&Path>) -> Result<()> {
    let periods = parse_periods(levels)?;
    let feeds = multi_level(count, &periods, seed, &SynthOptions::default())?;

    match out {
        None if feeds.len() == 1 => {
            write_bars(std::io::stdout().lock(), &feeds[0])?;
        }
        None => bail!("--out is required for more than one level"),
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            for (period, bars) in periods.iter().zip(&feeds) {
                let path = dir.join(format!("synth_{seed}_{period}.csv"));
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                write_bars(file, bars)?;
                println!("{} bars written to {}", bars.len(), path.display());
            }
        }
    }
    Ok(())
}

fn run_config(print_default: bool, check: Option<&Path>) -> Result<()> {
    let config = match check {
        Some(path) => load_config(path)?,
        None if print_default => ChanConfig::default(),
        None => bail!("one of --print-default or --check is required"),
    };
    print!("{}", config.to_toml()?);
    Ok(())
}

fn print_summary(result: &AnalysisResult) {
    let fp = &result.fingerprint;
    println!("Symbol:        {}", fp.symbol);
    if let (Some(first), Some(last)) = (fp.first_bar, fp.last_bar) {
        println!("Range:         {first} .. {last}");
    }
    println!("Config hash:   {}", fp.config_hash);
    for l in &result.levels {
        println!(
            "[{:>5}] bars={} merged={} strokes={} segs={} segsegs={} pivots={} seg_pivots={} bsp={} seg_bsp={}",
            l.period.as_str(),
            l.unit_count,
            l.bars.len(),
            l.strokes.len(),
            l.segments.len(),
            l.segsegs.len(),
            l.pivots.len(),
            l.seg_pivots.len(),
            l.signals.len(),
            l.seg_signals.len(),
        );
    }
    if result.misalign_count > 0 || result.inconsistent_count > 0 {
        println!(
            "Warnings:      {} misaligned, {} inconsistent parent bars",
            result.misalign_count, result.inconsistent_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_repeated_bars() {
        let cli = Cli::try_parse_from([
            "chanlab", "analyze", "--bars", "d.csv", "--bars", "m.csv", "--levels", "day,30m",
        ])
        .unwrap();
        match cli.command {
            Commands::Analyze { bars, levels, .. } => {
                assert_eq!(bars.len(), 2);
                assert_eq!(levels.as_deref(), Some("day,30m"));
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn levels_must_match_files() {
        let files = vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")];
        assert!(resolve_levels(None, &files).is_err());
        assert!(resolve_levels(Some("day"), &files).is_err());
        assert_eq!(
            resolve_levels(Some("day,60m"), &files).unwrap(),
            vec![Period::Day, Period::Min60]
        );
        assert_eq!(
            resolve_levels(None, &files[..1]).unwrap(),
            vec![Period::Day]
        );
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["chanlab", "config", "--print-default", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
