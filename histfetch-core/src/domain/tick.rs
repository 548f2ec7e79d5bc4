//! Tick — a single bid/ask price update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Timestamped;

/// Tick flag bits as reported by the trading terminal.
pub mod flags {
    pub const BID: u32 = 2;
    pub const ASK: u32 = 4;
}

/// One bid/ask update. `time` is truncated to the second, `time_msc` carries
/// the millisecond timestamp and is the ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    #[serde(with = "super::time_format")]
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: u64,
    pub time_msc: i64,
    pub flags: u32,
    pub volume_real: f64,
}

impl Tick {
    /// Build a quote tick (bid and ask changed) at a millisecond timestamp.
    pub fn quote(time_msc: i64, bid: f64, ask: f64) -> Option<Self> {
        let time = DateTime::from_timestamp(time_msc.div_euclid(1000), 0)?;
        Some(Self {
            time,
            bid,
            ask,
            last: 0.0,
            volume: 0,
            time_msc,
            flags: flags::BID | flags::ASK,
            volume_real: 0.0,
        })
    }

    /// Ask minus bid.
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

impl Timestamped for Tick {
    fn timestamp(&self) -> DateTime<Utc> {
        self.time
    }

    fn sort_key(&self) -> i64 {
        self.time_msc
    }
}
