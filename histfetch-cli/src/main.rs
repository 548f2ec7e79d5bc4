//! histfetch CLI: download historical ticks and bars to CSV.
//!
//! Commands:
//! - `ticks` — download ticks for a symbol and date range
//! - `bars` — download candles of one timeframe for a symbol and date range
//! - `batch` — download one file per calendar month over a span of years

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use histfetch_core::domain::range::parse_utc;
use histfetch_core::{DateRange, Timeframe};
use histfetch_runner::{
    download_bars, download_ticks, month_periods, run_batch, BarRequest, BatchKind,
    DownloadReport, FetchConfig, LogProgress, OutputTarget, SourceKind, TickRequest,
};
use log::{error, info};
use std::fmt::Display;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "histfetch",
    about = "histfetch — download historical ticks and bars to CSV"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data source: http (terminal bridge) or synthetic.
    #[arg(long, global = true)]
    source: Option<SourceKind>,

    /// Terminal bridge base URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Directory for auto-named output files.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Pause between requests, in milliseconds.
    #[arg(long, global = true)]
    request_delay_ms: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BatchKindArg {
    Ticks,
    Bars,
}

#[derive(Subcommand)]
enum Commands {
    /// Download ticks for a symbol.
    Ticks {
        /// Symbol to download (e.g. EURUSD).
        symbol: String,

        /// Start (YYYY-MM-DD or "YYYY-MM-DD HH:MM:SS", UTC).
        #[arg(long)]
        start: String,

        /// End (same formats). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        /// Output CSV file. Defaults to an auto-generated name.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Window length in hours for chunked requests.
        #[arg(long)]
        window_hours: Option<u64>,
    },
    /// Download bars (candles) for a symbol.
    Bars {
        /// Symbol to download (e.g. EURUSD).
        symbol: String,

        /// Start (YYYY-MM-DD or "YYYY-MM-DD HH:MM:SS", UTC). Defaults to 10 years ago.
        #[arg(long)]
        start: Option<String>,

        /// End (same formats). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        /// Timeframe: M1, M5, M15, M30, H1, H4, D1, W1, MN1.
        #[arg(long, default_value = "M1")]
        timeframe: Timeframe,

        /// Maximum bars per request.
        #[arg(long)]
        max_bars: Option<u64>,

        /// Output CSV file. Defaults to an auto-generated name.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Download one CSV per calendar month.
    Batch {
        /// Symbol to download (e.g. EURUSD).
        symbol: String,

        /// First year (January).
        #[arg(long)]
        from_year: i32,

        /// Last year (December).
        #[arg(long)]
        to_year: i32,

        /// What to download per period.
        #[arg(long, value_enum, default_value_t = BatchKindArg::Ticks)]
        kind: BatchKindArg,

        /// Bar timeframe when `--kind bars`.
        #[arg(long, default_value = "M1")]
        timeframe: Timeframe,

        /// Pause between periods, in seconds.
        #[arg(long, default_value_t = 1)]
        pause_secs: u64,

        /// Skip the confirmation prompt.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli.global)?;

    let ok = match cli.command {
        Commands::Ticks {
            symbol,
            start,
            end,
            output,
            window_hours,
        } => {
            let mut config = config;
            if let Some(hours) = window_hours {
                config.pipeline.tick_window_hours = hours;
            }
            config.validate()?;
            run_ticks(&config, symbol, &start, end.as_deref(), output)?
        }
        Commands::Bars {
            symbol,
            start,
            end,
            timeframe,
            max_bars,
            output,
        } => {
            let mut config = config;
            if let Some(max) = max_bars {
                config.pipeline.max_bars_per_request = max;
            }
            config.validate()?;
            run_bars(&config, symbol, start.as_deref(), end.as_deref(), timeframe, output)?
        }
        Commands::Batch {
            symbol,
            from_year,
            to_year,
            kind,
            timeframe,
            pause_secs,
            yes,
        } => {
            let kind = match kind {
                BatchKindArg::Ticks => BatchKind::Ticks,
                BatchKindArg::Bars => BatchKind::Bars(timeframe),
            };
            run_batch_cmd(&config, symbol, from_year, to_year, kind, pause_secs, yes)?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(global: &GlobalArgs) -> Result<FetchConfig> {
    let mut config = match &global.config {
        Some(path) => FetchConfig::from_file(path)?,
        None => FetchConfig::default(),
    };
    if let Some(kind) = global.source {
        config.source.kind = kind;
    }
    if let Some(url) = &global.base_url {
        config.source.http.base_url = url.clone();
    }
    if let Some(dir) = &global.output_dir {
        config.output.dir = dir.clone();
    }
    if let Some(ms) = global.request_delay_ms {
        config.pipeline.request_delay_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

fn parse_range(
    start: Option<&str>,
    end: Option<&str>,
    default_start: DateTime<Utc>,
) -> Result<DateRange> {
    let start = start.map(parse_utc).transpose()?.unwrap_or(default_start);
    let end = end.map(parse_utc).transpose()?.unwrap_or_else(Utc::now);
    DateRange::new(start, end).context("invalid date range")
}

fn output_target(config: &FetchConfig, output: Option<PathBuf>) -> OutputTarget {
    match output {
        Some(path) => OutputTarget::File(path),
        None => OutputTarget::AutoIn(config.output.dir.clone()),
    }
}

fn run_ticks(
    config: &FetchConfig,
    symbol: String,
    start: &str,
    end: Option<&str>,
    output: Option<PathBuf>,
) -> Result<bool> {
    let range = parse_range(Some(start), end, Utc::now())?;
    let request = TickRequest {
        symbol,
        range,
        output: output_target(config, output),
    };
    let mut source = config.source.build()?;

    match download_ticks(source.as_mut(), &request, &config.pipeline, &LogProgress) {
        Ok(report) => {
            print_report(&report);
            Ok(true)
        }
        Err(e) => {
            error!("tick download failed: {e}");
            Ok(false)
        }
    }
}

fn run_bars(
    config: &FetchConfig,
    symbol: String,
    start: Option<&str>,
    end: Option<&str>,
    timeframe: Timeframe,
    output: Option<PathBuf>,
) -> Result<bool> {
    let ten_years_ago = Utc::now() - chrono::Duration::days(365 * 10);
    let range = parse_range(start, end, ten_years_ago)?;
    let request = BarRequest {
        symbol,
        timeframe,
        range,
        output: output_target(config, output),
    };
    let mut source = config.source.build()?;

    match download_bars(source.as_mut(), &request, &config.pipeline, &LogProgress) {
        Ok(report) => {
            print_report(&report);
            Ok(true)
        }
        Err(e) => {
            error!("bar download failed: {e}");
            Ok(false)
        }
    }
}

fn run_batch_cmd(
    config: &FetchConfig,
    symbol: String,
    from_year: i32,
    to_year: i32,
    kind: BatchKind,
    pause_secs: u64,
    yes: bool,
) -> Result<bool> {
    if to_year < from_year {
        bail!("--to-year ({to_year}) is before --from-year ({from_year})");
    }
    let periods = month_periods(from_year, to_year)?;

    if !yes && !confirm(&format!(
        "Download {} monthly periods of {symbol} into {}? (y/n)",
        periods.len(),
        config.output.dir.display()
    ))? {
        info!("batch cancelled");
        return Ok(true);
    }

    let mut source = config.source.build()?;
    let summary = run_batch(
        source.as_mut(),
        &symbol,
        kind,
        &periods,
        &config.output.dir,
        &config.pipeline,
        Duration::from_secs(pause_secs),
        &LogProgress,
    );

    println!();
    println!(
        "Batch complete: {}/{} succeeded, {} failed",
        summary.succeeded, summary.total, summary.failed
    );
    for (label, err) in &summary.errors {
        eprintln!("Error for {label}: {err}");
    }
    Ok(summary.all_succeeded())
}

fn confirm(question: &str) -> Result<bool> {
    println!("{question}");
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read answer from stdin")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes" | "s" | "si"))
}

fn print_report<S: Display>(report: &DownloadReport<S>) {
    println!();
    println!("=== Download Result ===");
    println!("Symbol:         {}", report.symbol);
    println!("Records:        {}", report.records);
    println!("Period:         {} to {}", report.first, report.last);
    println!(
        "Chunks:         {}/{} with data",
        report.tally.with_data, report.tally.planned
    );
    println!("File:           {}", report.path.display());
    println!("File size:      {}", format_size(report.file_size));
    if let Ok(full) = std::fs::canonicalize(&report.path) {
        println!("Full path:      {}", full.display());
    }
    println!();
    println!("--- Statistics ---");
    println!("{}", report.stats);
    println!();
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
