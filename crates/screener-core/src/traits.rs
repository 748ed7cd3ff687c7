use crate::{
    Candle, CandleInterval, DirectionEstimate, HistoryPeriod, NewsSentiment, QuoteInfo,
    ScreenResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// Upstream equities API. Implementations return tagged errors
/// (`RateLimited` / `Transport` / `NotFound`); retry and throttling are owned
/// by the quote client wrapper, never by a provider.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch_history(
        &self,
        ticker: &str,
        period: HistoryPeriod,
        interval: CandleInterval,
    ) -> ScreenResult<Vec<Candle>>;

    async fn fetch_info(&self, ticker: &str) -> ScreenResult<QuoteInfo>;

    /// Fetch several tickers in one provider call where supported.
    /// The default implementation reports the capability as absent so the
    /// client falls back to per-ticker requests.
    async fn fetch_batch(
        &self,
        _tickers: &[String],
        _period: HistoryPeriod,
    ) -> ScreenResult<HashMap<String, Vec<Candle>>> {
        Err(crate::ScreenError::Transport(
            "batch fetch not supported by provider".to_string(),
        ))
    }
}

/// A loaded per-ticker price-direction model. The pipeline makes no
/// assumption about model structure beyond this call.
pub trait DirectionModel: Send + Sync + std::fmt::Debug {
    fn predict(&self, history: &[Candle]) -> ScreenResult<DirectionEstimate>;
}

/// Loads a direction model from an on-disk artifact.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> ScreenResult<Box<dyn DirectionModel>>;
}

/// News-sentiment analyzer. Unavailability is an expected condition; callers
/// fall back to the market gap prediction.
#[async_trait]
pub trait NewsAnalyzer: Send + Sync {
    async fn sentiment(&self, ticker: &str) -> ScreenResult<NewsSentiment>;
}

/// External per-ticker training routine invoked by phase 4.5. Failures are
/// isolated and never fail the pipeline.
#[async_trait]
pub trait ModelTrainer: Send + Sync {
    async fn train(&self, ticker: &str) -> ScreenResult<()>;
}
