//! Merge chunk results into one ordered record set.

use chrono::{DateTime, Utc};
use histfetch_core::{Bar, DateRange, Tick, Timestamped};
use log::warn;
use std::path::{Path, PathBuf};

/// Keep only records inside the half-open `range`.
///
/// Sources may answer a range as closed; clipping makes a record stamped on a
/// chunk boundary belong to the later chunk only.
pub fn clip_to_range<T: Timestamped>(mut records: Vec<T>, range: &DateRange) -> Vec<T> {
    records.retain(|r| range.contains(r.timestamp()));
    records
}

/// Flatten chunk results, dropping empty ones, preserving chunk order.
pub fn concat<T>(batches: Vec<Vec<T>>) -> Vec<T> {
    let total = batches.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for batch in batches.into_iter().filter(|b| !b.is_empty()) {
        out.extend(batch);
    }
    out
}

/// Stable sort ascending by the record's sort key.
pub fn sort_by_time<T: Timestamped>(records: &mut [T]) {
    records.sort_by_key(Timestamped::sort_key);
}

/// Ticks: sorted, duplicates kept.
pub fn finalize_ticks(mut ticks: Vec<Tick>) -> Vec<Tick> {
    sort_by_time(&mut ticks);
    ticks
}

/// Bars: malformed OHLC dropped, sorted, one bar per timestamp (the first
/// fetched wins).
pub fn finalize_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    let before = bars.len();
    bars.retain(Bar::is_sane);
    let dropped = before - bars.len();
    if dropped > 0 {
        warn!("dropped {dropped} malformed bars");
    }
    sort_by_time(&mut bars);
    bars.dedup_by_key(|b| b.time);
    bars
}

/// `<symbol>_<kind>_<YYYYMMDD first>_<YYYYMMDD last>_<count>.csv` in `dir`.
pub fn auto_filename(
    dir: &Path,
    symbol: &str,
    kind: &str,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
    count: usize,
) -> PathBuf {
    dir.join(format!(
        "{symbol}_{kind}_{}_{}_{count}.csv",
        first.format("%Y%m%d"),
        last.format("%Y%m%d"),
    ))
}

/// First and last timestamps of a sorted slice.
pub fn time_span<T: Timestamped>(records: &[T]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    Some((records.first()?.timestamp(), records.last()?.timestamp()))
}
