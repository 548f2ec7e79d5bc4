//! histfetch runner: download pipelines on top of `histfetch-core`.
//!
//! - Tick pipeline (full-range attempt, then fixed windows)
//! - Bar pipeline (chunked under the per-request bar cap, deduplicated)
//! - CSV export with auto-generated filenames
//! - Descriptive statistics
//! - Calendar-month batch runs
//! - TOML configuration

pub mod batch;
pub mod config;
pub mod export;
pub mod finalize;
pub mod pipeline;
pub mod stats;

pub use batch::{month_periods, run_batch, BatchKind, BatchSummary, Period};
pub use config::{ConfigError, FetchConfig, PipelineConfig, SourceKind};
pub use pipeline::{
    download_bars, download_ticks, BarRequest, ChunkOutcome, ChunkTally, DownloadReport,
    FetchProgress, LogProgress, OutputTarget, PipelineError, TickRequest,
};
pub use stats::{BarStats, TickStats};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<FetchConfig>();
        assert_sync::<FetchConfig>();
    }

    #[test]
    fn report_types_are_send_sync() {
        assert_send::<DownloadReport<TickStats>>();
        assert_sync::<DownloadReport<TickStats>>();
        assert_send::<DownloadReport<BarStats>>();
        assert_sync::<DownloadReport<BarStats>>();
        assert_send::<BatchSummary>();
    }
}
