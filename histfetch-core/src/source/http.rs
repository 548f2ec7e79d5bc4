//! HTTP bridge to a trading terminal.
//!
//! The terminal itself only exposes a local API, so a small bridge process
//! republishes it over HTTP/JSON:
//!
//! | call              | request                                             |
//! |-------------------|-----------------------------------------------------|
//! | initialize        | `POST {base}/initialize`                            |
//! | select symbol     | `POST {base}/symbols/{symbol}/select`               |
//! | ticks in range    | `GET {base}/ticks?symbol&from&to&flags=all`         |
//! | rates in range    | `GET {base}/rates?symbol&timeframe&from&to`         |
//! | shutdown          | `POST {base}/shutdown`                              |
//!
//! `from`/`to` are epoch seconds. A 404 or a JSON `null` body means no data.
//! Handles retries with exponential backoff and the circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::{DataSource, SourceError};
use crate::domain::{Bar, DateRange, Tick, Timeframe};
use chrono::DateTime;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Connection settings for [`HttpSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8228".into(),
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireTick {
    time: i64,
    bid: f64,
    ask: f64,
    #[serde(default)]
    last: f64,
    #[serde(default)]
    volume: u64,
    time_msc: i64,
    #[serde(default)]
    flags: u32,
    #[serde(default)]
    volume_real: f64,
}

#[derive(Debug, Deserialize)]
struct WireRate {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    tick_volume: u64,
    #[serde(default)]
    spread: i32,
    #[serde(default)]
    real_volume: u64,
}

impl TryFrom<WireTick> for Tick {
    type Error = SourceError;

    fn try_from(w: WireTick) -> Result<Self, Self::Error> {
        let time = DateTime::from_timestamp(w.time, 0).ok_or_else(|| {
            SourceError::ResponseFormatChanged(format!("invalid tick time: {}", w.time))
        })?;
        Ok(Tick {
            time,
            bid: w.bid,
            ask: w.ask,
            last: w.last,
            volume: w.volume,
            time_msc: w.time_msc,
            flags: w.flags,
            volume_real: w.volume_real,
        })
    }
}

impl TryFrom<WireRate> for Bar {
    type Error = SourceError;

    fn try_from(w: WireRate) -> Result<Self, Self::Error> {
        let time = DateTime::from_timestamp(w.time, 0).ok_or_else(|| {
            SourceError::ResponseFormatChanged(format!("invalid bar time: {}", w.time))
        })?;
        Ok(Bar {
            time,
            open: w.open,
            high: w.high,
            low: w.low,
            close: w.close,
            tick_volume: w.tick_volume,
            spread: w.spread,
            real_volume: w.real_volume,
        })
    }
}

/// Terminal bridge data source.
pub struct HttpSource {
    client: reqwest::blocking::Client,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpSource {
    pub fn new(
        config: &HttpSourceConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("histfetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            circuit_breaker,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn range_query(range: &DateRange) -> [(&'static str, String); 2] {
        [
            ("from", range.start().timestamp().to_string()),
            ("to", range.end().timestamp().to_string()),
        ]
    }

    /// Exponential backoff before retry `attempt` (1-based), saturating.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Send a request with retry and circuit breaker logic.
    ///
    /// Returns the response body, or `None` for 404. After a 429 the next
    /// attempt waits for the larger of the backoff and `retry-after`.
    fn send_with_retry<F>(&self, what: &str, build: F) -> Result<Option<String>, SourceError>
    where
        F: Fn(&reqwest::blocking::Client) -> reqwest::blocking::RequestBuilder,
    {
        let mut last_error = None;
        let mut retry_after: Option<Duration> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.backoff(attempt);
                let delay = retry_after.take().map_or(backoff, |wait| wait.max(backoff));
                debug!("retrying {what} in {delay:?} (attempt {attempt})");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                warn!(
                    "circuit breaker open, refusing {what} for another {:?}",
                    self.circuit_breaker.remaining_cooldown()
                );
                return Err(SourceError::CircuitBreakerTripped);
            }

            let resp = match build(&self.client).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(SourceError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(SourceError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(SourceError::CircuitBreakerTripped);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let secs = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                retry_after = secs.map(Duration::from_secs);
                last_error = Some(SourceError::RateLimited {
                    retry_after_secs: secs.unwrap_or(0),
                });
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(SourceError::AuthenticationRequired(format!(
                    "bridge rejected {what}"
                )));
            }

            if status == reqwest::StatusCode::NOT_FOUND {
                self.circuit_breaker.record_success();
                return Ok(None);
            }

            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(SourceError::Other(format!("HTTP {status} for {what}")));
                continue;
            }

            let body = resp.text().map_err(|e| {
                SourceError::ResponseFormatChanged(format!("unreadable body for {what}: {e}"))
            })?;
            self.circuit_breaker.record_success();
            return Ok(Some(body));
        }

        Err(last_error.unwrap_or_else(|| SourceError::Other("max retries exceeded".into())))
    }

    /// Decode a JSON array body where `null` means no data.
    fn decode<W, T>(what: &str, body: Option<String>) -> Result<Option<Vec<T>>, SourceError>
    where
        W: for<'de> Deserialize<'de>,
        T: TryFrom<W, Error = SourceError>,
    {
        let Some(body) = body else {
            return Ok(None);
        };
        let wire: Option<Vec<W>> = serde_json::from_str(&body).map_err(|e| {
            SourceError::ResponseFormatChanged(format!("failed to parse {what}: {e}"))
        })?;
        wire.map(|items| {
            items
                .into_iter()
                .map(T::try_from)
                .collect::<Result<Vec<T>, SourceError>>()
        })
        .transpose()
    }
}

impl DataSource for HttpSource {
    fn name(&self) -> &str {
        "terminal_bridge"
    }

    fn initialize(&mut self) -> Result<(), SourceError> {
        match self.send_with_retry("initialize", |c| c.post(self.url("initialize"))) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(SourceError::InitializationFailed(format!(
                "no bridge endpoint at {}",
                self.base_url
            ))),
            Err(e) => Err(SourceError::InitializationFailed(e.to_string())),
        }
    }

    fn select_symbol(&mut self, symbol: &str) -> Result<(), SourceError> {
        let path = format!("symbols/{symbol}/select");
        match self.send_with_retry("symbol select", |c| c.post(self.url(&path)))? {
            Some(_) => Ok(()),
            None => Err(SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            }),
        }
    }

    fn copy_ticks_range(
        &mut self,
        symbol: &str,
        range: &DateRange,
    ) -> Result<Option<Vec<Tick>>, SourceError> {
        let url = self.url("ticks");
        let body = self.send_with_retry("ticks", |c| {
            c.get(&url)
                .query(&[("symbol", symbol), ("flags", "all")])
                .query(&Self::range_query(range))
        })?;
        Self::decode::<WireTick, Tick>("ticks", body)
    }

    fn copy_rates_range(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        range: &DateRange,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        let url = self.url("rates");
        let body = self.send_with_retry("rates", |c| {
            c.get(&url)
                .query(&[("symbol", symbol), ("timeframe", timeframe.label())])
                .query(&Self::range_query(range))
        })?;
        Self::decode::<WireRate, Bar>("rates", body)
    }

    fn shutdown(&mut self) {
        let url = self.url("shutdown");
        if let Err(e) = self.client.post(&url).send() {
            warn!("bridge shutdown failed: {e}");
        }
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn decodes_tick_array() {
        let body = r#"[
            {"time":1704067200,"bid":1.1040,"ask":1.1042,"last":0.0,"volume":0,
             "time_msc":1704067200123,"flags":6,"volume_real":0.0}
        ]"#;
        let ticks = HttpSource::decode::<WireTick, Tick>("ticks", Some(body.into()))
            .unwrap()
            .unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].time_msc, 1_704_067_200_123);
        assert_eq!(ticks[0].flags, 6);
    }

    #[test]
    fn null_body_is_no_data() {
        let ticks = HttpSource::decode::<WireTick, Tick>("ticks", Some("null".into())).unwrap();
        assert!(ticks.is_none());
        let bars = HttpSource::decode::<WireRate, Bar>("rates", None).unwrap();
        assert!(bars.is_none());
    }

    #[test]
    fn optional_rate_fields_default() {
        let body = r#"[{"time":1704067200,"open":1.1,"high":1.2,"low":1.0,"close":1.15}]"#;
        let bars = HttpSource::decode::<WireRate, Bar>("rates", Some(body.into()))
            .unwrap()
            .unwrap();
        assert_eq!(bars[0].tick_volume, 0);
        assert_eq!(bars[0].spread, 0);
    }

    #[test]
    fn malformed_body_is_format_error() {
        let err = HttpSource::decode::<WireRate, Bar>("rates", Some("{\"oops\":1}".into()))
            .unwrap_err();
        assert!(matches!(err, SourceError::ResponseFormatChanged(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = HttpSourceConfig {
            base_url: "http://localhost:9000/".into(),
            ..Default::default()
        };
        let source = HttpSource::new(&config, Arc::new(CircuitBreaker::default_provider())).unwrap();
        assert_eq!(source.url("ticks"), "http://localhost:9000/ticks");
    }

    #[test]
    fn unreachable_bridge_fails_initialize() {
        // Port 9 (discard) is closed on test hosts; no retries keeps this fast.
        let config = HttpSourceConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            max_retries: 0,
            retry_base_delay_ms: 1,
        };
        let mut source =
            HttpSource::new(&config, Arc::new(CircuitBreaker::default_provider())).unwrap();
        assert!(matches!(
            source.initialize(),
            Err(SourceError::InitializationFailed(_))
        ));
    }

    // ── Bridge status handling against a loopback stub ──────────────

    /// Serve one canned response per connection, in order, and count requests.
    fn stub_bridge(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);
        std::thread::spawn(move || {
            for response in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).is_ok_and(|n| n > 0) {
                    if line == "\r\n" {
                        break;
                    }
                    line.clear();
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        (format!("http://{addr}"), served)
    }

    fn reply(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n{headers}\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn source_at(base_url: String, max_retries: u32) -> (HttpSource, Arc<CircuitBreaker>) {
        let config = HttpSourceConfig {
            base_url,
            timeout_secs: 5,
            max_retries,
            retry_base_delay_ms: 1,
        };
        let breaker = Arc::new(CircuitBreaker::default_provider());
        let source = HttpSource::new(&config, Arc::clone(&breaker)).unwrap();
        (source, breaker)
    }

    fn day_range() -> DateRange {
        let start = DateTime::from_timestamp(1_704_153_600, 0).unwrap();
        DateRange::new(start, start + chrono::Duration::days(1)).unwrap()
    }

    const ONE_TICK: &str = r#"[{"time":1704153600,"bid":1.1,"ask":1.1002,"time_msc":1704153600000}]"#;

    #[test]
    fn forbidden_trips_breaker() {
        let (url, served) = stub_bridge(vec![reply("403 Forbidden", "", "")]);
        let (mut source, breaker) = source_at(url, 3);

        let err = source.copy_ticks_range("EURUSD", &day_range()).unwrap_err();

        assert!(matches!(err, SourceError::CircuitBreakerTripped));
        assert_eq!(served.load(Ordering::SeqCst), 1);
        assert!(!breaker.is_allowed());
        assert!(!source.is_available());
    }

    #[test]
    fn open_breaker_sends_nothing() {
        let (url, served) = stub_bridge(vec![reply("200 OK", "", ONE_TICK)]);
        let (mut source, breaker) = source_at(url, 3);
        breaker.trip();

        let err = source.copy_ticks_range("EURUSD", &day_range()).unwrap_err();

        assert!(matches!(err, SourceError::CircuitBreakerTripped));
        assert_eq!(served.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unauthorized_is_auth_error() {
        let (url, served) = stub_bridge(vec![reply("401 Unauthorized", "", "")]);
        let (mut source, _) = source_at(url, 3);

        let err = source.copy_ticks_range("EURUSD", &day_range()).unwrap_err();

        assert!(matches!(err, SourceError::AuthenticationRequired(_)));
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn not_found_is_no_data() {
        let (url, _) = stub_bridge(vec![reply("404 Not Found", "", "")]);
        let (mut source, breaker) = source_at(url, 3);

        let ticks = source.copy_ticks_range("EURUSD", &day_range()).unwrap();

        assert!(ticks.is_none());
        assert!(breaker.is_allowed());
    }

    #[test]
    fn unknown_symbol_on_select() {
        let (url, _) = stub_bridge(vec![reply("404 Not Found", "", "")]);
        let (mut source, _) = source_at(url, 0);

        assert!(matches!(
            source.select_symbol("XXXYYY"),
            Err(SourceError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn server_error_is_retried() {
        let (url, served) = stub_bridge(vec![
            reply("500 Internal Server Error", "", ""),
            reply("200 OK", "", ONE_TICK),
        ]);
        let (mut source, _) = source_at(url, 2);

        let ticks = source.copy_ticks_range("EURUSD", &day_range()).unwrap().unwrap();

        assert_eq!(ticks.len(), 1);
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rate_limit_waits_for_retry_after() {
        let (url, served) = stub_bridge(vec![
            reply("429 Too Many Requests", "Retry-After: 1\r\n", ""),
            reply("200 OK", "", ONE_TICK),
        ]);
        let (mut source, _) = source_at(url, 1);

        let started = std::time::Instant::now();
        let ticks = source.copy_ticks_range("EURUSD", &day_range()).unwrap().unwrap();

        assert_eq!(ticks.len(), 1);
        assert_eq!(served.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn rate_limit_exhausts_retries() {
        let (url, served) = stub_bridge(vec![
            reply("429 Too Many Requests", "Retry-After: 0\r\n", ""),
            reply("429 Too Many Requests", "Retry-After: 0\r\n", ""),
        ]);
        let (mut source, _) = source_at(url, 1);

        let err = source.copy_ticks_range("EURUSD", &day_range()).unwrap_err();

        assert!(matches!(err, SourceError::RateLimited { retry_after_secs: 0 }));
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let (source, _) = source_at("http://127.0.0.1:9".into(), u32::MAX);
        assert_eq!(source.backoff(1), Duration::from_millis(1));
        assert_eq!(source.backoff(3), Duration::from_millis(4));
        assert_eq!(source.backoff(64), Duration::from_millis(u64::from(u32::MAX)));
    }
}
