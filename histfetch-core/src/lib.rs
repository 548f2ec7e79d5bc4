//! histfetch core: domain types, range chunking, and data sources.
//!
//! - Tick and bar records, timeframes, half-open date ranges
//! - Chunk planner that splits a range under a per-request size limit
//! - `DataSource` trait with a scoped `Session` guard
//! - Terminal HTTP bridge and deterministic synthetic sources

pub mod chunk;
pub mod domain;
pub mod source;

pub use chunk::{ChunkError, ChunkPolicy};
pub use domain::{Bar, DateRange, RangeError, Tick, Timeframe, Timestamped};
pub use source::{DataSource, Session, SourceError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: records and ranges can cross threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Tick>();
        require_sync::<Tick>();
        require_send::<Bar>();
        require_sync::<Bar>();
        require_send::<DateRange>();
        require_sync::<DateRange>();
        require_send::<ChunkPolicy>();
        require_sync::<ChunkPolicy>();
        require_send::<source::CircuitBreaker>();
        require_sync::<source::CircuitBreaker>();
    }
}
