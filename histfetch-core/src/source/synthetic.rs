//! Deterministic synthetic data source for offline runs and tests.
//!
//! Prices are a pure function of (symbol, timestamp), so the same record comes
//! back no matter how a range is chunked. Like real terminals, requests are
//! answered as closed ranges `[start, end]`, and a request larger than
//! `max_records` returns the no-data sentinel instead of a partial result.

use super::{DataSource, SourceError};
use crate::domain::tick::flags;
use crate::domain::{Bar, DateRange, Tick, Timeframe};
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SyntheticSource {
    tick_interval: Duration,
    max_records: usize,
    initialized: bool,
    selected: Option<String>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticSource {
    /// One tick per minute, at most one million records per request.
    pub fn new() -> Self {
        Self {
            tick_interval: Duration::minutes(1),
            max_records: 1_000_000,
            initialized: false,
            selected: None,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::milliseconds(1));
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    fn ensure_ready(&self, symbol: &str) -> Result<(), SourceError> {
        if !self.initialized {
            return Err(SourceError::Other("synthetic source not initialized".into()));
        }
        if self.selected.as_deref() != Some(symbol) {
            return Err(SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        Ok(())
    }

    /// Grid timestamps (epoch millis) inside the closed range, or `None` if
    /// the request exceeds the record limit.
    fn grid(&self, range: &DateRange, step_ms: i64) -> Option<Vec<i64>> {
        let start = range.start().timestamp_millis();
        let end = range.end().timestamp_millis();
        let mut first = start.div_euclid(step_ms) * step_ms;
        if first < start {
            first += step_ms;
        }
        if first > end {
            return Some(Vec::new());
        }
        let count = ((end - first) / step_ms + 1) as usize;
        if count > self.max_records {
            debug!("synthetic request of {count} records exceeds limit {}", self.max_records);
            return None;
        }
        Some((0..count as i64).map(|i| first + i * step_ms).collect())
    }
}

fn rng_for(symbol: &str, key: i64) -> StdRng {
    let mut hasher = blake3::Hasher::new();
    hasher.update(symbol.as_bytes());
    hasher.update(&key.to_le_bytes());
    StdRng::from_seed(*hasher.finalize().as_bytes())
}

fn base_price(symbol: &str) -> f64 {
    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    StdRng::from_seed(seed).gen_range(0.5..2.0)
}

/// Mid price at `t_ms`: a slow 30-day cycle plus per-timestamp noise.
fn mid_price(symbol: &str, base: f64, t_ms: i64) -> f64 {
    const CYCLE_MS: f64 = 30.0 * 86_400_000.0;
    let phase = (t_ms as f64 / CYCLE_MS) * std::f64::consts::TAU;
    let noise: f64 = rng_for(symbol, t_ms).gen_range(-0.0005..0.0005);
    base * (1.0 + 0.02 * phase.sin() + noise)
}

fn is_weekend(t: DateTime<Utc>) -> bool {
    matches!(t.weekday(), Weekday::Sat | Weekday::Sun)
}

fn round5(x: f64) -> f64 {
    (x * 100_000.0).round() / 100_000.0
}

impl DataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn initialize(&mut self) -> Result<(), SourceError> {
        self.initialized = true;
        Ok(())
    }

    fn select_symbol(&mut self, symbol: &str) -> Result<(), SourceError> {
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        self.selected = Some(symbol.to_string());
        Ok(())
    }

    fn copy_ticks_range(
        &mut self,
        symbol: &str,
        range: &DateRange,
    ) -> Result<Option<Vec<Tick>>, SourceError> {
        self.ensure_ready(symbol)?;
        let Some(grid) = self.grid(range, self.tick_interval.num_milliseconds()) else {
            return Ok(None);
        };

        let base = base_price(symbol);
        let ticks: Vec<Tick> = grid
            .into_iter()
            .filter_map(|t_ms| {
                let mid = mid_price(symbol, base, t_ms);
                let half_spread = mid * rng_for(symbol, !t_ms).gen_range(0.000_02..0.000_1);
                let tick = Tick::quote(t_ms, round5(mid - half_spread), round5(mid + half_spread))?;
                (!is_weekend(tick.time)).then_some(tick)
            })
            .collect();

        Ok((!ticks.is_empty()).then_some(ticks))
    }

    fn copy_rates_range(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        range: &DateRange,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        self.ensure_ready(symbol)?;
        let step_ms = timeframe.duration().num_milliseconds();
        let Some(grid) = self.grid(range, step_ms) else {
            return Ok(None);
        };

        let base = base_price(symbol);
        let intraday = timeframe.minutes() < Timeframe::W1.minutes();
        let bars: Vec<Bar> = grid
            .into_iter()
            .filter_map(|t_ms| {
                let time = DateTime::from_timestamp_millis(t_ms)?;
                if intraday && is_weekend(time) {
                    return None;
                }
                let open = mid_price(symbol, base, t_ms);
                let close = mid_price(symbol, base, t_ms + step_ms - 1);
                let mut rng = rng_for(symbol, !t_ms);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.001));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.001));
                Some(Bar {
                    time,
                    open: round5(open),
                    high: round5(high),
                    low: round5(low),
                    close: round5(close),
                    tick_volume: rng.gen_range(10..500),
                    spread: rng.gen_range(0..20),
                    real_volume: 0,
                })
            })
            .collect();

        Ok((!bars.is_empty()).then_some(bars))
    }

    fn shutdown(&mut self) {
        self.initialized = false;
        self.selected = None;
    }
}
