//! Throttled, retrying wrapper around a [`QuoteProvider`].
//!
//! The wrapper owns all retry and throttling policy: providers only return
//! tagged errors. One token-bucket (capacity 1) serializes outbound calls
//! across every worker so the per-IP request spacing holds regardless of
//! fan-out width.

pub mod chart_api;

pub use chart_api::ChartApiProvider;

use screener_core::{
    Candle, CandleInterval, HistoryPeriod, QuoteConfig, QuoteInfo, QuoteProvider, ScreenError,
    ScreenResult,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cross-worker call spacer. Holding the lock across the sleep serializes
/// callers, which is the intent: at most one outbound call per delay window.
struct Throttle {
    delay: Duration,
    next_allowed: Mutex<Option<Instant>>,
}

impl Throttle {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_allowed: Mutex::new(None),
        }
    }

    async fn acquire(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut next = self.next_allowed.lock().await;
        if let Some(at) = *next {
            let now = Instant::now();
            if at > now {
                tracing::debug!(
                    "throttle: waiting {:.2}s for provider slot",
                    (at - now).as_secs_f64()
                );
                tokio::time::sleep_until(at).await;
            }
        }
        *next = Some(Instant::now() + self.delay);
    }
}

pub struct QuoteClient {
    provider: Arc<dyn QuoteProvider>,
    throttle: Throttle,
    max_retries: u32,
    retry_backoff: Duration,
}

impl QuoteClient {
    pub fn new(provider: Arc<dyn QuoteProvider>, config: &QuoteConfig) -> Self {
        Self {
            provider,
            throttle: Throttle::new(Duration::from_secs_f64(config.base_delay_sec)),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_secs_f64(config.retry_backoff_sec),
        }
    }

    /// Fetch a candle series, normalized to strictly ascending timestamps.
    pub async fn fetch_candles(
        &self,
        ticker: &str,
        period: HistoryPeriod,
        interval: CandleInterval,
    ) -> ScreenResult<Vec<Candle>> {
        let series = self
            .with_retries(ticker, || {
                self.provider.fetch_history(ticker, period, interval)
            })
            .await?;
        Ok(normalize_series(series))
    }

    pub async fn fetch_info(&self, ticker: &str) -> ScreenResult<QuoteInfo> {
        self.with_retries(ticker, || self.provider.fetch_info(ticker))
            .await
    }

    /// Fetch several tickers at once. A successful batch call counts as one
    /// throttled request; if the provider cannot serve the batch, each ticker
    /// is fetched individually and per-ticker failures are returned alongside
    /// the series that did arrive.
    pub async fn fetch_batch(
        &self,
        tickers: &[String],
        period: HistoryPeriod,
    ) -> (HashMap<String, Vec<Candle>>, Vec<(String, ScreenError)>) {
        self.throttle.acquire().await;
        match self.provider.fetch_batch(tickers, period).await {
            Ok(series) => {
                let normalized = series
                    .into_iter()
                    .map(|(t, s)| (t, normalize_series(s)))
                    .collect();
                (normalized, Vec::new())
            }
            Err(e) => {
                tracing::warn!(
                    "batch fetch of {} tickers failed ({}), falling back to per-ticker",
                    tickers.len(),
                    e
                );
                let mut out = HashMap::new();
                let mut failures = Vec::new();
                for ticker in tickers {
                    match self
                        .fetch_candles(ticker, period, CandleInterval::Daily)
                        .await
                    {
                        Ok(series) => {
                            out.insert(ticker.clone(), series);
                        }
                        Err(e) => failures.push((ticker.clone(), e)),
                    }
                }
                (out, failures)
            }
        }
    }

    /// Shared retry loop: exponential backoff on rate limits up to
    /// `max_retries`, a single retry on transport errors, and the global
    /// throttle acquired before every attempt.
    async fn with_retries<T, Fut>(
        &self,
        label: &str,
        mut attempt: impl FnMut() -> Fut,
    ) -> ScreenResult<T>
    where
        Fut: Future<Output = ScreenResult<T>>,
    {
        let mut rate_retries: u32 = 0;
        let mut transport_retried = false;
        loop {
            self.throttle.acquire().await;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(ScreenError::RateLimited(msg)) => {
                    if rate_retries >= self.max_retries {
                        return Err(ScreenError::RateLimited(msg));
                    }
                    rate_retries += 1;
                    let wait = self
                        .retry_backoff
                        .mul_f64(2f64.powi(rate_retries as i32 - 1));
                    tracing::warn!(
                        "{}: rate limited, retry {}/{} in {:.1}s",
                        label,
                        rate_retries,
                        self.max_retries,
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(ScreenError::Transport(msg)) => {
                    if transport_retried {
                        return Err(ScreenError::Transport(msg));
                    }
                    transport_retried = true;
                    tracing::warn!("{}: transport error, retrying once: {}", label, msg);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Enforce the series invariant: sorted by timestamp ascending, duplicates
/// dropped (last occurrence wins).
fn normalize_series(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.ts);
    candles.reverse();
    candles.dedup_by_key(|c| c.ts);
    candles.reverse();
    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn candle(day: i64, close: f64) -> Candle {
        Candle {
            ts: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::days(day),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000_000.0,
        }
    }

    /// Provider that fails a configurable number of times before succeeding.
    struct FlakyProvider {
        rate_limit_failures: u32,
        transport_failures: u32,
        calls: AtomicU32,
    }

    impl FlakyProvider {
        fn rate_limited(n: u32) -> Self {
            Self {
                rate_limit_failures: n,
                transport_failures: 0,
                calls: AtomicU32::new(0),
            }
        }

        fn flaky_transport(n: u32) -> Self {
            Self {
                rate_limit_failures: 0,
                transport_failures: n,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl QuoteProvider for FlakyProvider {
        async fn fetch_history(
            &self,
            _ticker: &str,
            _period: HistoryPeriod,
            _interval: CandleInterval,
        ) -> ScreenResult<Vec<Candle>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.rate_limit_failures {
                return Err(ScreenError::RateLimited("429".to_string()));
            }
            if n < self.transport_failures {
                return Err(ScreenError::Transport("timeout".to_string()));
            }
            Ok(vec![candle(0, 100.0), candle(1, 101.0)])
        }

        async fn fetch_info(&self, _ticker: &str) -> ScreenResult<QuoteInfo> {
            Ok(QuoteInfo::default())
        }
    }

    fn config(max_retries: u32) -> QuoteConfig {
        QuoteConfig {
            base_delay_sec: 0.0,
            max_retries,
            retry_backoff_sec: 1.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_rate_limit_retries() {
        let provider = Arc::new(FlakyProvider::rate_limited(2));
        let client = QuoteClient::new(provider.clone(), &config(3));

        let series = client
            .fetch_candles("CBA.AX", HistoryPeriod::ThreeMonths, CandleInterval::Daily)
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retries_and_fails_rate_limited() {
        let provider = Arc::new(FlakyProvider::rate_limited(10));
        let client = QuoteClient::new(provider.clone(), &config(3));

        let err = client
            .fetch_candles("NAB.AX", HistoryPeriod::ThreeMonths, CandleInterval::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, ScreenError::RateLimited(_)));
        // 1 initial attempt + 3 retries.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_retries_drops_on_first_429() {
        let provider = Arc::new(FlakyProvider::rate_limited(1));
        let client = QuoteClient::new(provider.clone(), &config(0));

        let err = client
            .fetch_candles("NAB.AX", HistoryPeriod::ThreeMonths, CandleInterval::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, ScreenError::RateLimited(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_retried_exactly_once() {
        let provider = Arc::new(FlakyProvider::flaky_transport(1));
        let client = QuoteClient::new(provider.clone(), &config(3));

        let series = client
            .fetch_candles("CBA.AX", HistoryPeriod::ThreeMonths, CandleInterval::Daily)
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transport_fails_after_one_retry() {
        let provider = Arc::new(FlakyProvider::flaky_transport(10));
        let client = QuoteClient::new(provider.clone(), &config(3));

        let err = client
            .fetch_candles("CBA.AX", HistoryPeriod::ThreeMonths, CandleInterval::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, ScreenError::Transport(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_falls_back_to_per_ticker() {
        // FlakyProvider keeps the default fetch_batch, which is unsupported.
        let provider = Arc::new(FlakyProvider::rate_limited(0));
        let client = QuoteClient::new(provider.clone(), &config(3));

        let tickers = vec!["CBA.AX".to_string(), "WBC.AX".to_string()];
        let (series, failures) = client.fetch_batch(&tickers, HistoryPeriod::ThreeMonths).await;
        assert_eq!(series.len(), 2);
        assert!(failures.is_empty());
    }

    #[test]
    fn normalize_sorts_and_dedupes() {
        let series = vec![candle(2, 102.0), candle(0, 100.0), candle(2, 103.0)];
        let normalized = normalize_series(series);
        assert_eq!(normalized.len(), 2);
        assert!(normalized[0].ts < normalized[1].ts);
        // Last occurrence of the duplicate timestamp wins.
        assert_eq!(normalized[1].close, 103.0);
    }
}
