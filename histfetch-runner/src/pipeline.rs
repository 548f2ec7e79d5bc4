//! Tick and bar download pipelines.
//!
//! Each run: open a session → plan chunks → fetch sequentially with a pause
//! between requests → close the session → concatenate, sort, (dedupe) → CSV.
//!
//! A chunk that returns no data or fails is logged and skipped. The run only
//! fails if no chunk produced data, the session cannot be opened, or the file
//! cannot be written. No file is written for an empty run.

use chrono::{DateTime, Utc};
use histfetch_core::chunk::ChunkError;
use histfetch_core::source::{DataSource, Session, SourceError};
use histfetch_core::{Bar, DateRange, Tick, Timeframe, Timestamped};
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::export::{save_bars_csv, save_ticks_csv};
use crate::finalize::{auto_filename, clip_to_range, concat, finalize_bars, finalize_ticks, time_span};
use crate::stats::{BarStats, TickStats};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("session failed: {0}")]
    Session(#[from] SourceError),

    #[error("no data for {symbol} in {range}")]
    NoData { symbol: String, range: DateRange },

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("invalid chunk policy: {0}")]
    Chunk(#[from] ChunkError),
}

/// Where the CSV goes.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget {
    /// Exactly this path.
    File(PathBuf),
    /// An auto-generated name inside this directory.
    AutoIn(PathBuf),
}

#[derive(Debug, Clone)]
pub struct TickRequest {
    pub symbol: String,
    pub range: DateRange,
    pub output: OutputTarget,
}

#[derive(Debug, Clone)]
pub struct BarRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub range: DateRange,
    pub output: OutputTarget,
}

/// Per-run chunk accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkTally {
    pub planned: usize,
    pub with_data: usize,
    pub empty: usize,
    pub failed: usize,
    /// Not requested because the source stopped accepting requests.
    pub skipped: usize,
}

/// What happened to one chunk request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Records(usize),
    Empty,
    Failed(String),
}

/// Progress callbacks for a chunked fetch.
pub trait FetchProgress {
    fn on_chunk_start(&self, index: usize, total: usize, range: &DateRange);

    fn on_chunk_complete(&self, index: usize, total: usize, range: &DateRange, outcome: &ChunkOutcome);

    fn on_finish(&self, tally: &ChunkTally, records: usize);
}

/// Reports progress through the `log` facade.
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_chunk_start(&self, index: usize, total: usize, range: &DateRange) {
        info!("[{}/{}] requesting {range}", index + 1, total);
    }

    fn on_chunk_complete(&self, _index: usize, _total: usize, range: &DateRange, outcome: &ChunkOutcome) {
        match outcome {
            ChunkOutcome::Records(n) => info!("  {n} records"),
            ChunkOutcome::Empty => warn!("  no data in {range}"),
            ChunkOutcome::Failed(reason) => error!("  request for {range} failed: {reason}"),
        }
    }

    fn on_finish(&self, tally: &ChunkTally, records: usize) {
        info!(
            "fetched {records} records from {}/{} chunks ({} empty, {} failed, {} skipped)",
            tally.with_data, tally.planned, tally.empty, tally.failed, tally.skipped
        );
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct DownloadReport<S> {
    pub symbol: String,
    pub path: PathBuf,
    pub records: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub file_size: u64,
    pub tally: ChunkTally,
    pub stats: S,
}

/// Fetch `chunks` one by one, pausing `delay` between requests.
///
/// Returns the non-empty, range-clipped results in chunk order.
fn fetch_chunks<'a, T, F>(
    session: &mut Session<'a>,
    chunks: &[DateRange],
    delay: Duration,
    progress: &dyn FetchProgress,
    mut fetch: F,
) -> (Vec<Vec<T>>, ChunkTally)
where
    T: Timestamped,
    F: FnMut(&mut Session<'a>, &DateRange) -> Result<Option<Vec<T>>, SourceError>,
{
    let total = chunks.len();
    let mut tally = ChunkTally {
        planned: total,
        ..Default::default()
    };
    let mut batches = Vec::new();

    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if !session.is_available() {
            tally.skipped = total - i;
            warn!("{} stopped accepting requests; skipping {} chunks", session.source_name(), tally.skipped);
            break;
        }

        progress.on_chunk_start(i, total, chunk);
        let outcome = match fetch(session, chunk) {
            Ok(Some(records)) => {
                let records = clip_to_range(records, chunk);
                if records.is_empty() {
                    ChunkOutcome::Empty
                } else {
                    let n = records.len();
                    batches.push(records);
                    ChunkOutcome::Records(n)
                }
            }
            Ok(None) => ChunkOutcome::Empty,
            Err(e) => ChunkOutcome::Failed(e.to_string()),
        };

        match outcome {
            ChunkOutcome::Records(_) => tally.with_data += 1,
            ChunkOutcome::Empty => tally.empty += 1,
            ChunkOutcome::Failed(_) => tally.failed += 1,
        }
        progress.on_chunk_complete(i, total, chunk, &outcome);
    }

    (batches, tally)
}

/// Ticks for the session's symbol over `range`, unsorted.
///
/// Tries the whole range in one request first (when enabled); if that yields
/// nothing, falls back to fixed windows.
pub fn fetch_ticks(
    session: &mut Session<'_>,
    range: &DateRange,
    settings: &PipelineConfig,
    progress: &dyn FetchProgress,
) -> Result<(Vec<Tick>, ChunkTally), PipelineError> {
    if settings.try_full_range {
        info!("requesting full range {range}");
        match session.ticks(range) {
            Ok(Some(ticks)) => {
                let ticks = clip_to_range(ticks, range);
                if !ticks.is_empty() {
                    info!("full range returned {} ticks", ticks.len());
                    let tally = ChunkTally {
                        planned: 1,
                        with_data: 1,
                        ..Default::default()
                    };
                    progress.on_finish(&tally, ticks.len());
                    return Ok((ticks, tally));
                }
                info!("full range returned no ticks, falling back to windows");
            }
            Ok(None) => info!("full range returned no data, falling back to windows"),
            Err(e) => warn!("full range request failed ({e}), falling back to windows"),
        }
        std::thread::sleep(settings.request_delay());
    }

    let chunks = settings.tick_policy()?.plan(range);
    info!("{} tick windows planned", chunks.len());
    let (batches, tally) = fetch_chunks(session, &chunks, settings.request_delay(), progress, |s, r| s.ticks(r));
    let ticks = concat(batches);
    progress.on_finish(&tally, ticks.len());
    Ok((ticks, tally))
}

/// Bars for the session's symbol over `range`, unsorted and possibly duplicated.
pub fn fetch_bars(
    session: &mut Session<'_>,
    timeframe: Timeframe,
    range: &DateRange,
    settings: &PipelineConfig,
    progress: &dyn FetchProgress,
) -> Result<(Vec<Bar>, ChunkTally), PipelineError> {
    let chunks = settings.bar_policy(timeframe)?.plan(range);
    info!("{} {timeframe} chunks planned", chunks.len());
    let (batches, tally) = fetch_chunks(session, &chunks, settings.request_delay(), progress, |s, r| {
        s.rates(timeframe, r)
    });
    let bars = concat(batches);
    progress.on_finish(&tally, bars.len());
    Ok((bars, tally))
}

fn resolve_path<T: Timestamped>(
    target: &OutputTarget,
    symbol: &str,
    kind: &str,
    records: &[T],
) -> Option<(PathBuf, DateTime<Utc>, DateTime<Utc>)> {
    let (first, last) = time_span(records)?;
    let path = match target {
        OutputTarget::File(path) => path.clone(),
        OutputTarget::AutoIn(dir) => auto_filename(dir, symbol, kind, first, last, records.len()),
    };
    Some((path, first, last))
}

/// Download ticks and write them to CSV.
pub fn download_ticks(
    source: &mut dyn DataSource,
    request: &TickRequest,
    settings: &PipelineConfig,
    progress: &dyn FetchProgress,
) -> Result<DownloadReport<TickStats>, PipelineError> {
    info!("downloading {} ticks {}", request.symbol, request.range);
    let (ticks, tally) = {
        let mut session = Session::open(source, &request.symbol)?;
        fetch_ticks(&mut session, &request.range, settings, progress)?
    };

    let ticks = finalize_ticks(ticks);
    let (Some((path, first, last)), Some(stats)) = (
        resolve_path(&request.output, &request.symbol, "ticks", &ticks),
        TickStats::from_ticks(&ticks),
    ) else {
        error!("no ticks found for {} in {}", request.symbol, request.range);
        return Err(PipelineError::NoData {
            symbol: request.symbol.clone(),
            range: request.range,
        });
    };

    info!("saving {} ticks to {}", ticks.len(), path.display());
    let file_size = save_ticks_csv(&path, &ticks).map_err(|e| PipelineError::Write {
        path: path.clone(),
        reason: format!("{e:#}"),
    })?;

    Ok(DownloadReport {
        symbol: request.symbol.clone(),
        path,
        records: ticks.len(),
        first,
        last,
        file_size,
        tally,
        stats,
    })
}

/// Download bars and write them to CSV.
pub fn download_bars(
    source: &mut dyn DataSource,
    request: &BarRequest,
    settings: &PipelineConfig,
    progress: &dyn FetchProgress,
) -> Result<DownloadReport<BarStats>, PipelineError> {
    info!(
        "downloading {} {} bars {}",
        request.symbol, request.timeframe, request.range
    );
    let (bars, tally) = {
        let mut session = Session::open(source, &request.symbol)?;
        fetch_bars(&mut session, request.timeframe, &request.range, settings, progress)?
    };

    let bars = finalize_bars(bars);
    let (Some((path, first, last)), Some(stats)) = (
        resolve_path(&request.output, &request.symbol, request.timeframe.label(), &bars),
        BarStats::from_bars(&bars),
    ) else {
        error!("no bars found for {} in {}", request.symbol, request.range);
        return Err(PipelineError::NoData {
            symbol: request.symbol.clone(),
            range: request.range,
        });
    };

    info!("saving {} bars to {}", bars.len(), path.display());
    let file_size = save_bars_csv(&path, &bars).map_err(|e| PipelineError::Write {
        path: path.clone(),
        reason: format!("{e:#}"),
    })?;

    Ok(DownloadReport {
        symbol: request.symbol.clone(),
        path,
        records: bars.len(),
        first,
        last,
        file_size,
        tally,
        stats,
    })
}
