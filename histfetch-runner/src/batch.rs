//! Multi-period batch downloads over calendar months.

use chrono::{Datelike, NaiveDate};
use histfetch_core::source::DataSource;
use histfetch_core::{DateRange, RangeError, Timeframe};
use log::{error, info};
use std::path::Path;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::pipeline::{
    download_bars, download_ticks, BarRequest, FetchProgress, OutputTarget, PipelineError,
    TickRequest,
};

const MONTH_NAMES: [&str; 12] = [
    "JANUARY", "FEBRUARY", "MARCH", "APRIL", "MAY", "JUNE", "JULY", "AUGUST", "SEPTEMBER",
    "OCTOBER", "NOVEMBER", "DECEMBER",
];

/// A labelled date range, e.g. `MARCH_2024`.
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub label: String,
    pub range: DateRange,
}

/// One period per calendar month from January `from_year` through December
/// `to_year`, each `[first day, first day of next month)`.
pub fn month_periods(from_year: i32, to_year: i32) -> Result<Vec<Period>, RangeError> {
    let mut periods = Vec::new();
    for year in from_year..=to_year {
        for month in 1..=12u32 {
            let start = NaiveDate::from_ymd_opt(year, month, 1)
                .ok_or_else(|| RangeError::Unparseable(format!("{year}-{month:02}-01")))?;
            let next = if month == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(year, month + 1, 1)
            }
            .ok_or_else(|| RangeError::Unparseable(format!("month after {start}")))?;

            periods.push(Period {
                label: format!("{}_{}", MONTH_NAMES[start.month0() as usize], year),
                range: DateRange::from_dates(start, next)?,
            });
        }
    }
    Ok(periods)
}

/// What a batch downloads per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Ticks,
    Bars(Timeframe),
}

/// Summary of a batch run.
#[derive(Debug)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(String, PipelineError)>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Download every period into `<dir>/<symbol>_<label>.csv`.
///
/// Each period gets its own session. Failures are recorded and the batch
/// moves on; `pause` separates consecutive periods.
#[allow(clippy::too_many_arguments)]
pub fn run_batch(
    source: &mut dyn DataSource,
    symbol: &str,
    kind: BatchKind,
    periods: &[Period],
    dir: &Path,
    settings: &PipelineConfig,
    pause: Duration,
    progress: &dyn FetchProgress,
) -> BatchSummary {
    let total = periods.len();
    let mut succeeded = 0;
    let mut errors = Vec::new();

    for (i, period) in periods.iter().enumerate() {
        if i > 0 && !pause.is_zero() {
            std::thread::sleep(pause);
        }
        info!("[{}/{}] downloading {}", i + 1, total, period.label);

        let output = OutputTarget::File(dir.join(format!("{symbol}_{}.csv", period.label)));
        let result = match kind {
            BatchKind::Ticks => download_ticks(
                source,
                &TickRequest {
                    symbol: symbol.to_string(),
                    range: period.range,
                    output,
                },
                settings,
                progress,
            )
            .map(|r| r.path),
            BatchKind::Bars(timeframe) => download_bars(
                source,
                &BarRequest {
                    symbol: symbol.to_string(),
                    timeframe,
                    range: period.range,
                    output,
                },
                settings,
                progress,
            )
            .map(|r| r.path),
        };

        match result {
            Ok(path) => {
                info!("{} completed: {}", period.label, path.display());
                succeeded += 1;
            }
            Err(e) => {
                error!("{} failed: {e}", period.label);
                errors.push((period.label.clone(), e));
            }
        }
    }

    let failed = errors.len();
    info!("batch complete: {succeeded}/{total} succeeded, {failed} failed");
    BatchSummary {
        total,
        succeeded,
        failed,
        errors,
    }
}
