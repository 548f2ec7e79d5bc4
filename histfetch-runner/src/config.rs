//! Fetch configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. CLI flags override individual values after loading.
//!
//! ```toml
//! [source]
//! kind = "http"
//!
//! [source.http]
//! base_url = "http://127.0.0.1:8228"
//!
//! [pipeline]
//! request_delay_ms = 100
//! max_bars_per_request = 100000
//! ```

use chrono::Duration;
use histfetch_core::chunk::{ChunkError, ChunkPolicy};
use histfetch_core::source::{
    CircuitBreaker, DataSource, HttpSource, HttpSourceConfig, SourceError, SyntheticSource,
};
use histfetch_core::Timeframe;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Upper bound for `source.http.max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Upper bound for `pipeline.tick_window_hours` (one year).
pub const MAX_TICK_WINDOW_HOURS: u64 = 24 * 366;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
}

impl FetchConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: FetchConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.max_bars_per_request == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_bars_per_request must be at least 1".into(),
            ));
        }
        if !(1..=MAX_TICK_WINDOW_HOURS).contains(&p.tick_window_hours) {
            return Err(ConfigError::Invalid(format!(
                "pipeline.tick_window_hours must be in 1..={MAX_TICK_WINDOW_HOURS}, got {}",
                p.tick_window_hours
            )));
        }
        if !(p.safety_margin > 0.0 && p.safety_margin <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "pipeline.safety_margin must be in (0, 1], got {}",
                p.safety_margin
            )));
        }
        if self.source.kind == SourceKind::Http && self.source.http.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("source.http.base_url is empty".into()));
        }
        if self.source.http.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "source.http.max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.source.http.max_retries
            )));
        }
        if self.source.synthetic.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "source.synthetic.tick_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Which data source backs a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Http,
    Synthetic,
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(SourceKind::Http),
            "synthetic" => Ok(SourceKind::Synthetic),
            _ => Err(format!("unknown source '{s}'. Valid: http, synthetic")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub http: HttpSourceConfig,
    pub synthetic: SyntheticConfig,
}

impl SourceConfig {
    /// Build the configured data source.
    pub fn build(&self) -> Result<Box<dyn DataSource>, SourceError> {
        match self.kind {
            SourceKind::Http => {
                let breaker = Arc::new(CircuitBreaker::default_provider());
                Ok(Box::new(HttpSource::new(&self.http, breaker)?))
            }
            SourceKind::Synthetic => Ok(Box::new(
                SyntheticSource::new()
                    .with_tick_interval(Duration::milliseconds(
                        i64::try_from(self.synthetic.tick_interval_ms).unwrap_or(i64::MAX),
                    ))
                    .with_max_records(self.synthetic.max_records),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub tick_interval_ms: u64,
    pub max_records: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 60_000,
            max_records: 1_000_000,
        }
    }
}

/// Chunking and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pause between consecutive requests.
    pub request_delay_ms: u64,
    /// Per-request bar cap of the upstream API.
    pub max_bars_per_request: u64,
    /// Fraction of the cap used per window once a range is split.
    pub safety_margin: f64,
    /// Window length for chunked tick requests.
    pub tick_window_hours: u64,
    /// Ask for the whole tick range in one request before chunking.
    pub try_full_range: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 100,
            max_bars_per_request: 100_000,
            safety_margin: histfetch_core::chunk::DEFAULT_SAFETY_MARGIN,
            tick_window_hours: 24,
            try_full_range: true,
        }
    }
}

impl PipelineConfig {
    pub fn request_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_delay_ms)
    }

    pub fn tick_policy(&self) -> Result<ChunkPolicy, ChunkError> {
        let window = i64::try_from(self.tick_window_hours)
            .ok()
            .and_then(Duration::try_hours)
            .ok_or(ChunkError::WindowOutOfRange(self.tick_window_hours))?;
        ChunkPolicy::ticks(window)
    }

    pub fn bar_policy(&self, timeframe: Timeframe) -> Result<ChunkPolicy, ChunkError> {
        ChunkPolicy::bars(timeframe, self.max_bars_per_request)?.with_safety_margin(self.safety_margin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for auto-named output files.
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}
