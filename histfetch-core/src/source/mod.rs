//! Data source trait, structured errors, and the scoped session guard.
//!
//! A `DataSource` is a trading-terminal style API: it must be initialized and
//! have the symbol selected before any range request, and it must be shut
//! down afterwards. `Session` owns that lifecycle so teardown runs on every
//! exit path.

pub mod circuit_breaker;
pub mod http;
pub mod synthetic;

use log::{debug, info};
use thiserror::Error;

use crate::domain::{Bar, DateRange, Tick, Timeframe};

pub use circuit_breaker::CircuitBreaker;
pub use http::{HttpSource, HttpSourceConfig};
pub use synthetic::SyntheticSource;

/// Structured errors from a data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to initialize data source: {0}")]
    InitializationFailed(String),

    #[error("symbol {symbol} is not available")]
    SymbolNotFound { symbol: String },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by data source (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("hard stop: data source has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("data source error: {0}")]
    Other(String),
}

/// A historical data API with an explicit session lifecycle.
///
/// Range requests use the half-open convention of [`DateRange`], but callers
/// must not rely on it: upstream terminals often treat ranges as closed, and
/// the pipelines clip every result to the requested range.
///
/// `Ok(None)` is the "no data" sentinel; it is not an error.
pub trait DataSource {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    fn initialize(&mut self) -> Result<(), SourceError>;

    /// Make `symbol` available for range requests.
    fn select_symbol(&mut self, symbol: &str) -> Result<(), SourceError>;

    fn copy_ticks_range(
        &mut self,
        symbol: &str,
        range: &DateRange,
    ) -> Result<Option<Vec<Tick>>, SourceError>;

    fn copy_rates_range(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        range: &DateRange,
    ) -> Result<Option<Vec<Bar>>, SourceError>;

    /// Release the session. Must be safe to call after a failed request.
    fn shutdown(&mut self);

    /// False while the source refuses requests (rate limit, ban).
    fn is_available(&self) -> bool {
        true
    }
}

/// An initialized source with one symbol selected.
///
/// Dropping the session shuts the source down.
pub struct Session<'a> {
    source: &'a mut dyn DataSource,
    symbol: String,
}

impl<'a> Session<'a> {
    /// Initialize `source` and select `symbol`.
    ///
    /// If selection fails the source is shut down before returning.
    pub fn open(source: &'a mut dyn DataSource, symbol: &str) -> Result<Self, SourceError> {
        source.initialize()?;
        info!("{} session initialized", source.name());

        if let Err(e) = source.select_symbol(symbol) {
            source.shutdown();
            return Err(e);
        }

        Ok(Self {
            source,
            symbol: symbol.to_string(),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn is_available(&self) -> bool {
        self.source.is_available()
    }

    pub fn ticks(&mut self, range: &DateRange) -> Result<Option<Vec<Tick>>, SourceError> {
        self.source.copy_ticks_range(&self.symbol, range)
    }

    pub fn rates(
        &mut self,
        timeframe: Timeframe,
        range: &DateRange,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        self.source.copy_rates_range(&self.symbol, timeframe, range)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.source.shutdown();
        debug!("{} session closed", self.source.name());
    }
}
