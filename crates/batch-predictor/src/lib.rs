//! Fan-out ensemble predictor: per ticker, combine {direction model, trend,
//! technicals, news sentiment} into one signal with renormalizing fallback.
//!
//! Components that cannot be computed are omitted and their weight is
//! redistributed over the rest; the sentiment component never goes missing
//! because it falls back to the market gap prediction.

pub mod analyzer;
pub mod model_store;
pub mod training;

pub use analyzer::HttpNewsAnalyzer;
pub use model_store::ModelStore;

use screener_core::{
    Component, MarketSentiment, NewsAnalyzer, Prediction, PredictionComponents, PredictorWeights,
    Regime, ScannedTicker, Signal, TickerInfo,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Relative MA gap that saturates trend confidence at 1.0.
const TREND_GAP_SCALE: f64 = 0.05;

/// Thresholds for a directional signal.
const SIGNAL_DIRECTION_MIN: f64 = 0.2;
const SIGNAL_CONFIDENCE_MIN: f64 = 0.5;

pub struct PredictOutcome {
    pub predictions: Vec<Prediction>,
    pub warnings: Vec<String>,
}

pub struct BatchPredictor {
    store: Arc<ModelStore>,
    analyzer: Option<Arc<dyn NewsAnalyzer>>,
    weights: PredictorWeights,
    workers: usize,
}

impl BatchPredictor {
    pub fn new(
        store: Arc<ModelStore>,
        analyzer: Option<Arc<dyn NewsAnalyzer>>,
        weights: PredictorWeights,
        workers: usize,
    ) -> Self {
        Self {
            store,
            analyzer,
            weights,
            workers: workers.max(1),
        }
    }

    /// Predict every scanned ticker. Results come back keyed by ticker in
    /// ticker-ascending order; per-ticker failures degrade to a HOLD with
    /// zero confidence plus a warning.
    pub async fn predict_all(
        &self,
        scanned: &[ScannedTicker],
        sentiment: &MarketSentiment,
        _regime: &Regime,
        cancel: &CancellationToken,
    ) -> PredictOutcome {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<(String, Prediction)> = JoinSet::new();
        let mut warnings = Vec::new();

        for stock in scanned {
            if cancel.is_cancelled() {
                tracing::info!("predict cancelled; draining in-flight tickers");
                break;
            }

            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let analyzer = self.analyzer.clone();
            let weights = self.weights;
            let sentiment = sentiment.clone();
            let stock = stock.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let ticker = stock.info.ticker.clone();
                let prediction =
                    predict_one(&store, analyzer.as_deref(), &weights, &sentiment, &stock).await;
                (ticker, prediction)
            });
        }

        let mut predictions = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, prediction)) => predictions.push(prediction),
                Err(e) => {
                    tracing::warn!("predict task failed: {}", e);
                    warnings.push(format!("predict task failed: {}", e));
                }
            }
        }

        predictions.sort_by(|a, b| a.ticker.cmp(&b.ticker));

        PredictOutcome {
            predictions,
            warnings,
        }
    }
}

async fn predict_one(
    store: &ModelStore,
    analyzer: Option<&dyn NewsAnalyzer>,
    weights: &PredictorWeights,
    sentiment: &MarketSentiment,
    stock: &ScannedTicker,
) -> Prediction {
    let ticker = &stock.info.ticker;

    let model = model_component(store, ticker, stock);
    let trend = trend_component(&stock.info);
    let technical = technical_component(&stock.info);
    let sentiment_comp = sentiment_component(analyzer, ticker, sentiment).await;

    ensemble(
        ticker,
        weights,
        PredictionComponents {
            model,
            trend,
            technical,
            sentiment: sentiment_comp,
        },
    )
}

fn model_component(store: &ModelStore, ticker: &str, stock: &ScannedTicker) -> Component {
    let model = match store.load(ticker) {
        Ok(model) => model,
        Err(e) => {
            tracing::debug!("{}: model unavailable: {}", ticker, e);
            return Component::unavailable();
        }
    };

    match model.predict(&stock.candles) {
        Ok(est) => Component::new(est.direction, est.confidence),
        Err(e) => {
            tracing::debug!("{}: model predict failed: {}", ticker, e);
            Component::unavailable()
        }
    }
}

/// Vote price-vs-MA20 against MA20-vs-MA50; confidence comes from the
/// smaller of the two relative gaps.
fn trend_component(info: &TickerInfo) -> Component {
    let (price, ma20, ma50) = match (info.price, info.ma_20, info.ma_50) {
        (Some(p), Some(m20), Some(m50)) if m20 > 0.0 && m50 > 0.0 => (p, m20, m50),
        _ => return Component::unavailable(),
    };

    let vote1 = (price - ma20).signum();
    let vote2 = (ma20 - ma50).signum();
    let direction = (vote1 + vote2).signum();

    let gap1 = ((price - ma20) / ma20).abs();
    let gap2 = ((ma20 - ma50) / ma50).abs();
    let confidence = (gap1.min(gap2) / TREND_GAP_SCALE).clamp(0.0, 1.0);

    Component::new(direction, confidence)
}

/// RSI-driven: oversold votes up, overbought votes down, the middle is a
/// weak neutral.
fn technical_component(info: &TickerInfo) -> Component {
    let rsi = match info.rsi_14 {
        Some(rsi) => rsi,
        None => return Component::unavailable(),
    };

    if rsi < 30.0 {
        Component::new(1.0, (30.0 - rsi) / 30.0)
    } else if rsi > 70.0 {
        Component::new(-1.0, (rsi - 70.0) / 30.0)
    } else {
        Component::new(0.0, 0.2)
    }
}

/// News sentiment when the analyzer has articles, otherwise the market gap
/// prediction. Either way the component stays available.
async fn sentiment_component(
    analyzer: Option<&dyn NewsAnalyzer>,
    ticker: &str,
    sentiment: &MarketSentiment,
) -> Component {
    if let Some(analyzer) = analyzer {
        match analyzer.sentiment(ticker).await {
            Ok(reading) if reading.article_count >= 1 => {
                return Component::new(
                    reading.label.sign() * reading.confidence,
                    reading.confidence,
                );
            }
            Ok(_) => {
                tracing::debug!("{}: no articles, falling back to gap prediction", ticker);
            }
            Err(e) => {
                tracing::debug!("{}: analyzer unavailable ({}), using gap prediction", ticker, e);
            }
        }
    }

    let gap = &sentiment.gap_prediction;
    Component::new((gap.pct / 2.0).clamp(-1.0, 1.0), gap.confidence)
}

/// Weighted means over available components with weights renormalized to the
/// available set.
fn ensemble(ticker: &str, weights: &PredictorWeights, components: PredictionComponents) -> Prediction {
    let weighted = [
        (weights.model, &components.model),
        (weights.trend, &components.trend),
        (weights.technical, &components.technical),
        (weights.sentiment, &components.sentiment),
    ];

    let total_weight: f64 = weighted
        .iter()
        .filter(|(_, c)| c.available)
        .map(|(w, _)| w)
        .sum();

    if total_weight <= 0.0 {
        tracing::warn!("{}: no ensemble components available", ticker);
        let mut hold = Prediction::hold(ticker);
        hold.components = components;
        return hold;
    }

    let direction: f64 = weighted
        .iter()
        .filter(|(_, c)| c.available)
        .map(|(w, c)| w * c.direction)
        .sum::<f64>()
        / total_weight;

    let confidence: f64 = weighted
        .iter()
        .filter(|(_, c)| c.available)
        .map(|(w, c)| w * c.confidence)
        .sum::<f64>()
        / total_weight;

    let signal = if direction >= SIGNAL_DIRECTION_MIN && confidence >= SIGNAL_CONFIDENCE_MIN {
        Signal::Buy
    } else if direction <= -SIGNAL_DIRECTION_MIN && confidence >= SIGNAL_CONFIDENCE_MIN {
        Signal::Sell
    } else {
        Signal::Hold
    };

    Prediction {
        ticker: ticker.to_string(),
        components,
        signal,
        ensemble_direction: direction,
        ensemble_confidence: confidence,
    }
}
