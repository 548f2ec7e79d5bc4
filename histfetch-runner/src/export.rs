//! CSV export for ticks and bars.
//!
//! Header row = record field names, one row per record, times formatted as
//! `YYYY-MM-DD HH:MM:SS` in UTC. Rows are the records' serde form.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use histfetch_core::{Bar, Tick};
use serde::Serialize;

pub const TICK_HEADER: [&str; 8] = [
    "time",
    "bid",
    "ask",
    "last",
    "volume",
    "time_msc",
    "flags",
    "volume_real",
];

pub const BAR_HEADER: [&str; 8] = [
    "time",
    "open",
    "high",
    "low",
    "close",
    "tick_volume",
    "spread",
    "real_volume",
];

/// Header first (also for an empty slice), then one serialized row per record.
fn write_records<W: Write, T: Serialize>(writer: W, header: &[&str], records: &[T]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(header)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush().context("failed to flush CSV writer")?;
    Ok(())
}

/// Write ticks as CSV to any writer.
pub fn write_ticks<W: Write>(writer: W, ticks: &[Tick]) -> Result<()> {
    write_records(writer, &TICK_HEADER, ticks)
}

/// Write bars as CSV to any writer.
pub fn write_bars<W: Write>(writer: W, bars: &[Bar]) -> Result<()> {
    write_records(writer, &BAR_HEADER, bars)
}

/// Write to `path`, creating parent directories. A partially written file is
/// removed on failure.
pub fn save_csv<F>(path: &Path, write: F) -> Result<u64>
where
    F: FnOnce(&mut std::io::BufWriter<std::fs::File>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir: {}", parent.display()))?;
    }

    let result: Result<()> = (|| {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut buf = std::io::BufWriter::new(file);
        write(&mut buf)?;
        buf.flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(path);
        return Err(e);
    }

    let size = std::fs::metadata(path)
        .with_context(|| format!("output file missing after write: {}", path.display()))?
        .len();
    Ok(size)
}

/// Save ticks to `path`; returns the file size in bytes.
pub fn save_ticks_csv(path: &Path, ticks: &[Tick]) -> Result<u64> {
    save_csv(path, |w| write_ticks(w, ticks))
}

/// Save bars to `path`; returns the file size in bytes.
pub fn save_bars_csv(path: &Path, bars: &[Bar]) -> Result<u64> {
    save_csv(path, |w| write_bars(w, bars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn tick_csv_has_header_and_rows() {
        let tick = Tick::quote(1_704_067_200_123, 1.1040, 1.1042).unwrap();
        let mut out = Vec::new();
        write_ticks(&mut out, &[tick]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "time,bid,ask,last,volume,time_msc,flags,volume_real"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2024-01-01 00:00:00,1.104,1.1042,0.0,0,1704067200123,6,0.0"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn bar_csv_columns() {
        let bar = Bar {
            time: Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap(),
            open: 1.1,
            high: 1.2,
            low: 1.0,
            close: 1.15,
            tick_volume: 42,
            spread: 3,
            real_volume: 0,
        };
        let mut out = Vec::new();
        write_bars(&mut out, &[bar]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "time,open,high,low,close,tick_volume,spread,real_volume\n\
             2024-01-02 09:30:00,1.1,1.2,1.0,1.15,42,3,0\n"
        );
    }

    /// The fixed headers must name the serialized fields in order.
    #[test]
    fn headers_match_serialized_fields() {
        fn derived_header<T: Serialize>(record: &T) -> String {
            let mut wtr = csv::Writer::from_writer(Vec::new());
            wtr.serialize(record).unwrap();
            let text = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
            text.lines().next().unwrap().to_string()
        }

        let tick = Tick::quote(1_704_067_200_123, 1.1040, 1.1042).unwrap();
        assert_eq!(derived_header(&tick), TICK_HEADER.join(","));

        let bar = Bar {
            time: Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap(),
            open: 1.1,
            high: 1.2,
            low: 1.0,
            close: 1.15,
            tick_volume: 42,
            spread: 3,
            real_volume: 0,
        };
        assert_eq!(derived_header(&bar), BAR_HEADER.join(","));
    }

    #[test]
    fn empty_slice_still_gets_header() {
        let mut out = Vec::new();
        write_ticks(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("{}\n", TICK_HEADER.join(",")));
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/bars.csv");
        let size = save_bars_csv(&path, &[]).unwrap();
        assert!(path.exists());
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.csv");
        let err = save_csv(&path, |_| anyhow::bail!("disk full")).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(!path.exists());
    }
}
