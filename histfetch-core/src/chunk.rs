//! Date-range chunking under a per-request size limit.
//!
//! Upstream APIs cap how many records one request may return. The planner
//! estimates a range's size in abstract units (bars of a timeframe, or fixed
//! windows for ticks) and splits it into contiguous half-open windows that
//! stay below the cap.

use chrono::Duration;
use thiserror::Error;

use crate::domain::{DateRange, Timeframe};

/// Fraction of the cap actually requested per window.
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.9;

#[derive(Debug, Error, PartialEq)]
pub enum ChunkError {
    #[error("chunk unit must be positive, got {0}")]
    NonPositiveUnit(Duration),

    #[error("max units per request must be at least 1")]
    ZeroMaxUnits,

    #[error("safety margin must be in (0, 1], got {0}")]
    InvalidMargin(f64),

    #[error("window of {0} hours is out of range")]
    WindowOutOfRange(u64),
}

/// How a range is split into requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkPolicy {
    max_units: u64,
    unit: Duration,
    safety_margin: f64,
    /// Cut windows even when the estimate fits under the cap.
    always_split: bool,
}

impl ChunkPolicy {
    /// Cap requests at `max_units` units of length `unit`, with the default margin.
    pub fn new(max_units: u64, unit: Duration) -> Result<Self, ChunkError> {
        if unit <= Duration::zero() {
            return Err(ChunkError::NonPositiveUnit(unit));
        }
        if max_units == 0 {
            return Err(ChunkError::ZeroMaxUnits);
        }
        Ok(Self {
            max_units,
            unit,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            always_split: false,
        })
    }

    /// Cap requests at `max_bars` bars of `timeframe`.
    pub fn bars(timeframe: Timeframe, max_bars: u64) -> Result<Self, ChunkError> {
        Self::new(max_bars, timeframe.duration())
    }

    /// One request per `window` of wall-clock time.
    ///
    /// Any range longer than `window` is split, including ranges shorter
    /// than two windows.
    pub fn ticks(window: Duration) -> Result<Self, ChunkError> {
        let mut policy = Self::new(1, window)?.exact();
        policy.always_split = true;
        Ok(policy)
    }

    pub fn with_safety_margin(mut self, margin: f64) -> Result<Self, ChunkError> {
        if !(margin > 0.0 && margin <= 1.0) {
            return Err(ChunkError::InvalidMargin(margin));
        }
        self.safety_margin = margin;
        Ok(self)
    }

    /// Use the full cap per window (margin 1.0).
    fn exact(mut self) -> Self {
        self.safety_margin = 1.0;
        self
    }

    pub fn max_units(&self) -> u64 {
        self.max_units
    }

    pub fn unit(&self) -> Duration {
        self.unit
    }

    pub fn safety_margin(&self) -> f64 {
        self.safety_margin
    }

    /// Estimated number of whole units in `range`.
    pub fn estimate(&self, range: &DateRange) -> u64 {
        let unit_ms = self.unit.num_milliseconds().max(1);
        (range.duration().num_milliseconds() / unit_ms) as u64
    }

    /// Window length used once a range has to be split.
    pub fn window(&self) -> Duration {
        let units = ((self.max_units as f64) * self.safety_margin).floor().max(1.0);
        let ms = (units * self.unit.num_milliseconds() as f64).min(i64::MAX as f64);
        Duration::milliseconds(ms as i64)
    }

    /// Split `range` into ordered, contiguous sub-ranges.
    ///
    /// Returns the range unchanged when it is empty or its estimate fits
    /// under the cap (unless the policy always splits). Otherwise each window
    /// is `[cur, min(cur + window, end))` and the next window starts exactly
    /// where the previous one ended.
    pub fn plan(&self, range: &DateRange) -> Vec<DateRange> {
        if range.is_empty() || (!self.always_split && self.estimate(range) <= self.max_units) {
            return vec![*range];
        }

        let window = self.window();
        let end = range.end();
        let mut chunks = Vec::new();
        let mut current = range.start();

        while current < end {
            let chunk_end = current
                .checked_add_signed(window)
                .map_or(end, |t| t.min(end));
            // current < chunk_end <= end, so construction cannot fail
            if let Ok(chunk) = DateRange::new(current, chunk_end) {
                chunks.push(chunk);
            }
            current = chunk_end;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn range(a: DateTime<Utc>, b: DateTime<Utc>) -> DateRange {
        DateRange::new(a, b).unwrap()
    }

    #[test]
    fn small_range_is_single_chunk() {
        let policy = ChunkPolicy::bars(Timeframe::M1, 100_000).unwrap();
        let r = range(utc(2024, 1, 1), utc(2024, 1, 10));
        assert_eq!(policy.plan(&r), vec![r]);
    }

    #[test]
    fn ten_day_range_in_three_day_windows() {
        let policy = ChunkPolicy::new(3, Duration::days(1))
            .unwrap()
            .with_safety_margin(1.0)
            .unwrap();
        let chunks = policy.plan(&range(utc(2024, 1, 1), utc(2024, 1, 10)));
        assert_eq!(
            chunks,
            vec![
                range(utc(2024, 1, 1), utc(2024, 1, 4)),
                range(utc(2024, 1, 4), utc(2024, 1, 7)),
                range(utc(2024, 1, 7), utc(2024, 1, 10)),
            ]
        );
    }

    #[test]
    fn final_chunk_is_clipped() {
        let policy = ChunkPolicy::new(4, Duration::days(1))
            .unwrap()
            .with_safety_margin(1.0)
            .unwrap();
        let chunks = policy.plan(&range(utc(2024, 1, 1), utc(2024, 1, 10)));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], range(utc(2024, 1, 9), utc(2024, 1, 10)));
    }

    #[test]
    fn default_margin_shrinks_window() {
        // 100_000 one-minute bars at 90% -> 90_000 minute windows (62.5 days)
        let policy = ChunkPolicy::bars(Timeframe::M1, 100_000).unwrap();
        assert_eq!(policy.window(), Duration::minutes(90_000));

        let r = range(utc(2024, 1, 1), utc(2024, 7, 1));
        let chunks = policy.plan(&r);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].duration(), Duration::minutes(90_000));
        assert_eq!(chunks.last().unwrap().end(), r.end());
    }

    #[test]
    fn tiny_cap_still_advances() {
        // floor(1 * 0.9) would be 0 units; the window never drops below one unit
        let policy = ChunkPolicy::new(1, Duration::hours(1)).unwrap();
        assert_eq!(policy.window(), Duration::hours(1));
        let chunks = policy.plan(&range(utc(2024, 1, 1), utc(2024, 1, 2)));
        assert_eq!(chunks.len(), 24);
    }

    #[test]
    fn tick_policy_uses_whole_windows() {
        let policy = ChunkPolicy::ticks(Duration::days(1)).unwrap();
        let chunks = policy.plan(&range(utc(2024, 1, 1), utc(2024, 1, 4)));
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.duration() == Duration::days(1)));
    }

    #[test]
    fn tick_policy_splits_ranges_under_two_windows() {
        let policy = ChunkPolicy::ticks(Duration::days(1)).unwrap();
        let start = utc(2024, 1, 2);
        let chunks = policy.plan(&range(start, start + Duration::hours(36)));
        assert_eq!(
            chunks,
            vec![
                range(start, utc(2024, 1, 3)),
                range(utc(2024, 1, 3), start + Duration::hours(36)),
            ]
        );
    }

    #[test]
    fn tick_policy_keeps_short_range_whole() {
        let policy = ChunkPolicy::ticks(Duration::days(1)).unwrap();
        let r = range(utc(2024, 1, 2), utc(2024, 1, 2) + Duration::hours(6));
        assert_eq!(policy.plan(&r), vec![r]);
    }

    #[test]
    fn empty_range_yields_itself() {
        let policy = ChunkPolicy::ticks(Duration::days(1)).unwrap();
        let r = range(utc(2024, 1, 1), utc(2024, 1, 1));
        assert_eq!(policy.plan(&r), vec![r]);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert_eq!(
            ChunkPolicy::new(0, Duration::minutes(1)),
            Err(ChunkError::ZeroMaxUnits)
        );
        assert!(matches!(
            ChunkPolicy::new(10, Duration::zero()),
            Err(ChunkError::NonPositiveUnit(_))
        ));
        let p = ChunkPolicy::new(10, Duration::minutes(1)).unwrap();
        assert!(p.with_safety_margin(0.0).is_err());
        assert!(p.with_safety_margin(1.5).is_err());
        assert!(p.with_safety_margin(f64::NAN).is_err());
    }
}
