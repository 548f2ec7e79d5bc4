//! Domain types: ticks, bars, timeframes, and date ranges.

pub mod bar;
pub mod range;
pub mod tick;
pub mod time_format;
pub mod timeframe;

pub use bar::Bar;
pub use range::{DateRange, RangeError};
pub use tick::Tick;
pub use timeframe::Timeframe;

/// A market record that can be ordered on a single timeline.
///
/// Both pipelines sort, clip, and deduplicate through this trait.
pub trait Timestamped {
    /// Record timestamp.
    fn timestamp(&self) -> chrono::DateTime<chrono::Utc>;

    /// Sort key with the finest resolution the record carries.
    fn sort_key(&self) -> i64 {
        self.timestamp().timestamp_millis()
    }
}
