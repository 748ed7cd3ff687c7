//! HTTP chart-API provider. Maps HTTP status to the tagged error kinds the
//! client's retry policy keys on; it performs no retries of its own.

use async_trait::async_trait;
use chrono::DateTime;
use screener_core::{
    Candle, CandleInterval, HistoryPeriod, QuoteInfo, QuoteProvider, ScreenError, ScreenResult,
};
use serde::Deserialize;
use std::time::Duration;

const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ChartApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ChartApiProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(TRANSPORT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> ScreenResult<T> {
        let mut builder = self.client.get(url).query(query);
        if let Some(ref key) = self.api_key {
            builder = builder.header("X-Api-Key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ScreenError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            429 => return Err(ScreenError::RateLimited(format!("HTTP 429 on {}", url))),
            404 => return Err(ScreenError::NotFound(url.to_string())),
            s if !(200..300).contains(&s) => {
                return Err(ScreenError::Transport(format!("HTTP {} on {}", s, url)));
            }
            _ => {}
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ScreenError::Transport(format!("bad response body: {}", e)))
    }
}

#[async_trait]
impl QuoteProvider for ChartApiProvider {
    async fn fetch_history(
        &self,
        ticker: &str,
        period: HistoryPeriod,
        interval: CandleInterval,
    ) -> ScreenResult<Vec<Candle>> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        let body: ChartResponse = self
            .get_json(&url, &[("range", period.as_str()), ("interval", interval.as_str())])
            .await?;

        let result = body
            .chart
            .result
            .into_iter()
            .next()
            .ok_or_else(|| ScreenError::NotFound(ticker.to_string()))?;

        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .unwrap_or_default();

        let mut candles = Vec::with_capacity(result.timestamp.len());
        for (i, ts) in result.timestamp.iter().enumerate() {
            let (open, high, low, close, volume) = (
                value_at(&quote.open, i),
                value_at(&quote.high, i),
                value_at(&quote.low, i),
                value_at(&quote.close, i),
                value_at(&quote.volume, i),
            );
            // Provider emits nulls for halted sessions; skip those rows.
            if let (Some(open), Some(high), Some(low), Some(close)) = (open, high, low, close) {
                if let Some(ts) = DateTime::from_timestamp(*ts, 0) {
                    candles.push(Candle {
                        ts,
                        open,
                        high,
                        low,
                        close,
                        volume: volume.unwrap_or(0.0),
                    });
                }
            }
        }

        Ok(candles)
    }

    async fn fetch_info(&self, ticker: &str) -> ScreenResult<QuoteInfo> {
        let url = format!("{}/v10/finance/quoteSummary/{}", self.base_url, ticker);
        let body: SummaryResponse = self
            .get_json(&url, &[("modules", "price,summaryDetail")])
            .await?;

        let result = body
            .quote_summary
            .result
            .into_iter()
            .next()
            .ok_or_else(|| ScreenError::NotFound(ticker.to_string()))?;

        let price = result.price.unwrap_or_default();
        let detail = result.summary_detail.unwrap_or_default();

        Ok(QuoteInfo {
            market_cap: price.market_cap.and_then(|v| v.raw),
            avg_volume: detail.average_volume.and_then(|v| v.raw),
            price: price.regular_market_price.and_then(|v| v.raw),
            beta: detail.beta.and_then(|v| v.raw),
        })
    }
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Vec<ChartResult>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    #[serde(default)]
    result: Vec<SummaryResult>,
}

#[derive(Debug, Deserialize)]
struct SummaryResult {
    #[serde(default)]
    price: Option<PriceModule>,
    #[serde(default, rename = "summaryDetail")]
    summary_detail: Option<SummaryDetailModule>,
}

#[derive(Debug, Default, Deserialize)]
struct PriceModule {
    #[serde(default, rename = "marketCap")]
    market_cap: Option<RawValue>,
    #[serde(default, rename = "regularMarketPrice")]
    regular_market_price: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryDetailModule {
    #[serde(default, rename = "averageVolume")]
    average_volume: Option<RawValue>,
    #[serde(default)]
    beta: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
struct RawValue {
    #[serde(default)]
    raw: Option<f64>,
}
