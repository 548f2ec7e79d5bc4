//! Descriptive statistics printed after a download.

use chrono::{DateTime, Utc};
use histfetch_core::{Bar, Tick};
use serde::Serialize;
use std::fmt;

/// Pip size used for spread reporting (4-decimal FX quotes).
const PIPS_PER_UNIT: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickStats {
    pub count: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub span_days: i64,
    pub ticks_per_day: f64,
    pub ticks_per_hour: f64,
    pub ticks_per_minute: f64,
    pub bid_min: f64,
    pub bid_max: f64,
    pub ask_min: f64,
    pub ask_max: f64,
    pub mean_spread_pips: f64,
    pub volume_total: u64,
    pub volume_mean: f64,
}

impl TickStats {
    /// `None` for an empty slice. Expects ticks sorted by time.
    pub fn from_ticks(ticks: &[Tick]) -> Option<Self> {
        let first = ticks.first()?.time;
        let last = ticks.last()?.time;
        let count = ticks.len();
        let n = count as f64;

        let span_days = (last - first).num_days();
        let ticks_per_day = n / span_days.max(1) as f64;
        let ticks_per_hour = ticks_per_day / 24.0;

        let (mut bid_min, mut bid_max) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut ask_min, mut ask_max) = (f64::INFINITY, f64::NEG_INFINITY);
        let mut spread_sum = 0.0;
        let mut volume_total = 0u64;
        for t in ticks {
            bid_min = bid_min.min(t.bid);
            bid_max = bid_max.max(t.bid);
            ask_min = ask_min.min(t.ask);
            ask_max = ask_max.max(t.ask);
            spread_sum += t.spread();
            volume_total = volume_total.saturating_add(t.volume);
        }

        Some(Self {
            count,
            first,
            last,
            span_days,
            ticks_per_day,
            ticks_per_hour,
            ticks_per_minute: ticks_per_hour / 60.0,
            bid_min,
            bid_max,
            ask_min,
            ask_max,
            mean_spread_pips: spread_sum / n * PIPS_PER_UNIT,
            volume_total,
            volume_mean: volume_total as f64 / n,
        })
    }
}

impl fmt::Display for TickStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total ticks:      {}", self.count)?;
        writeln!(f, "Period:           {} to {}", self.first, self.last)?;
        writeln!(f, "Span:             {} days", self.span_days)?;
        writeln!(f, "Ticks per day:    {:.0}", self.ticks_per_day)?;
        writeln!(f, "Ticks per hour:   {:.0}", self.ticks_per_hour)?;
        writeln!(f, "Ticks per minute: {:.1}", self.ticks_per_minute)?;
        writeln!(f, "Bid min/max:      {:.5} / {:.5}", self.bid_min, self.bid_max)?;
        writeln!(f, "Ask min/max:      {:.5} / {:.5}", self.ask_min, self.ask_max)?;
        writeln!(f, "Mean spread:      {:.1} pips", self.mean_spread_pips)?;
        writeln!(f, "Total volume:     {}", self.volume_total)?;
        write!(f, "Mean volume:      {:.2}", self.volume_mean)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarStats {
    pub count: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub lowest_low: f64,
    pub highest_high: f64,
    pub total_tick_volume: u64,
    pub mean_spread: f64,
}

impl BarStats {
    /// `None` for an empty slice. Expects bars sorted by time.
    pub fn from_bars(bars: &[Bar]) -> Option<Self> {
        let first = bars.first()?.time;
        let last = bars.last()?.time;
        Some(Self {
            count: bars.len(),
            first,
            last,
            lowest_low: bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min),
            highest_high: bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max),
            total_tick_volume: bars.iter().map(|b| b.tick_volume).sum(),
            mean_spread: bars.iter().map(|b| b.spread as f64).sum::<f64>() / bars.len() as f64,
        })
    }
}

impl fmt::Display for BarStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total bars:       {}", self.count)?;
        writeln!(f, "Period:           {} to {}", self.first, self.last)?;
        writeln!(f, "Low / high:       {:.5} / {:.5}", self.lowest_low, self.highest_high)?;
        writeln!(f, "Tick volume:      {}", self.total_tick_volume)?;
        write!(f, "Mean spread:      {:.1} points", self.mean_spread)
    }
}
