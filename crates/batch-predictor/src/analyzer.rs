//! HTTP client for the external news-sentiment service. Any failure maps to
//! `AnalyzerUnavailable`; the predictor then falls back to the market gap
//! prediction, so this client performs no retries.

use async_trait::async_trait;
use screener_core::{NewsAnalyzer, NewsSentiment, ScreenError, ScreenResult, SentimentLabel};
use serde::Deserialize;
use std::time::Duration;

pub struct HttpNewsAnalyzer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNewsAnalyzer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Build from `SENTIMENT_API_URL`, or `None` when the service is not
    /// configured.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SENTIMENT_API_URL").ok().filter(|s| !s.is_empty())?;
        Some(Self::new(url, Duration::from_secs(10)))
    }
}

#[derive(Debug, Deserialize)]
struct SentimentResponse {
    label: String,
    confidence: f64,
    #[serde(default)]
    article_count: usize,
}

#[async_trait]
impl NewsAnalyzer for HttpNewsAnalyzer {
    async fn sentiment(&self, ticker: &str) -> ScreenResult<NewsSentiment> {
        let response = self
            .client
            .get(format!("{}/sentiment/{}", self.base_url, ticker))
            .send()
            .await
            .map_err(|e| ScreenError::AnalyzerUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ScreenError::AnalyzerUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: SentimentResponse = response
            .json()
            .await
            .map_err(|e| ScreenError::AnalyzerUnavailable(e.to_string()))?;

        let label = match body.label.to_lowercase().as_str() {
            "positive" | "bullish" => SentimentLabel::Positive,
            "negative" | "bearish" => SentimentLabel::Negative,
            _ => SentimentLabel::Neutral,
        };

        Ok(NewsSentiment {
            label,
            confidence: body.confidence.clamp(0.0, 1.0),
            article_count: body.article_count,
        })
    }
}
