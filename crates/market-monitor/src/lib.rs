//! Market monitor: one index snapshot per run, feeding the sentiment score
//! and the overnight gap prediction into scanning and prediction.
//!
//! The monitor never fails the pipeline. Any index problem degrades to the
//! neutral snapshot (score 50, HOLD, flat gap) plus a warning.

use quote_client::QuoteClient;
use screener_core::{
    CandleInterval, GapDirection, GapPrediction, HistoryPeriod, MarketSentiment, Recommendation,
    Stance, Universe,
};
use std::sync::Arc;

/// Minimum trading days of index history needed for the 14-day change.
const MIN_INDEX_DAYS: usize = 15;

/// Fraction of the leading index's overnight move expected to carry into the
/// local open.
const GAP_CARRY_FACTOR: f64 = 0.65;

/// Gap moves smaller than this (percent) are treated as flat.
const GAP_FLAT_THRESHOLD: f64 = 0.05;

pub struct MonitorOutcome {
    pub sentiment: MarketSentiment,
    pub warnings: Vec<String>,
}

pub struct MarketMonitor {
    quotes: Arc<QuoteClient>,
}

impl MarketMonitor {
    pub fn new(quotes: Arc<QuoteClient>) -> Self {
        Self { quotes }
    }

    pub async fn snapshot(&self, universe: &Universe) -> MonitorOutcome {
        let mut warnings = Vec::new();

        let closes = match self
            .quotes
            .fetch_candles(
                &universe.index_symbol,
                HistoryPeriod::ThreeMonths,
                CandleInterval::Daily,
            )
            .await
        {
            Ok(series) if series.len() >= MIN_INDEX_DAYS => {
                series.iter().map(|c| c.close).collect::<Vec<f64>>()
            }
            Ok(series) => {
                warnings.push(format!(
                    "index {}: only {} trading days, need {}; using neutral sentiment",
                    universe.index_symbol,
                    series.len(),
                    MIN_INDEX_DAYS
                ));
                return MonitorOutcome {
                    sentiment: MarketSentiment::neutral(),
                    warnings,
                };
            }
            Err(e) => {
                warnings.push(format!(
                    "index {} fetch failed ({}); using neutral sentiment",
                    universe.index_symbol, e
                ));
                return MonitorOutcome {
                    sentiment: MarketSentiment::neutral(),
                    warnings,
                };
            }
        };

        let index_change_1d = pct_change(&closes, 1);
        let index_change_5d = pct_change(&closes, 5);
        let index_change_7d = pct_change(&closes, 7);
        let index_change_14d = pct_change(&closes, 14);

        let vol_gauge_level = match &universe.vol_gauge_symbol {
            Some(symbol) => match self
                .quotes
                .fetch_candles(symbol, HistoryPeriod::OneMonth, CandleInterval::Daily)
                .await
            {
                Ok(series) => series.last().map(|c| c.close),
                Err(e) => {
                    tracing::debug!("vol gauge {} unavailable: {}", symbol, e);
                    None
                }
            },
            None => None,
        };

        let gap_prediction = self.gap_prediction(universe, &mut warnings).await;

        let sentiment_score = sentiment_score(
            index_change_1d,
            index_change_5d,
            index_change_7d,
            index_change_14d,
            &gap_prediction,
        );

        MonitorOutcome {
            sentiment: MarketSentiment {
                index_change_1d,
                index_change_5d,
                index_change_7d,
                index_change_14d,
                vol_gauge_level,
                gap_prediction,
                sentiment_score,
                recommendation: Recommendation {
                    stance: Stance::from_score(sentiment_score),
                },
            },
            warnings,
        }
    }

    /// For markets with a leading external index, the expected open gap is a
    /// fraction of the lead's overnight close. Without a lead the prediction
    /// is omitted: flat with confidence 0.5.
    async fn gap_prediction(
        &self,
        universe: &Universe,
        warnings: &mut Vec<String>,
    ) -> GapPrediction {
        let lead = match &universe.lead_index_symbol {
            Some(symbol) => symbol,
            None => {
                return GapPrediction {
                    pct: 0.0,
                    confidence: 0.5,
                    direction: GapDirection::Flat,
                };
            }
        };

        match self
            .quotes
            .fetch_candles(lead, HistoryPeriod::OneMonth, CandleInterval::Daily)
            .await
        {
            Ok(series) if series.len() >= 2 => {
                let closes: Vec<f64> = series.iter().map(|c| c.close).collect();
                let lead_1d = pct_change(&closes, 1);
                let pct = GAP_CARRY_FACTOR * lead_1d;
                let direction = if pct > GAP_FLAT_THRESHOLD {
                    GapDirection::Up
                } else if pct < -GAP_FLAT_THRESHOLD {
                    GapDirection::Down
                } else {
                    GapDirection::Flat
                };
                // Larger overnight lead moves carry more conviction.
                let confidence = (0.5 + lead_1d.abs() * 0.1).min(0.9);
                GapPrediction {
                    pct,
                    confidence,
                    direction,
                }
            }
            Ok(_) | Err(_) => {
                warnings.push(format!(
                    "lead index {} unavailable; gap prediction defaulted to flat",
                    lead
                ));
                GapPrediction {
                    pct: 0.0,
                    confidence: 0.5,
                    direction: GapDirection::Flat,
                }
            }
        }
    }
}

/// Percent change over the last `days` trading days.
fn pct_change(closes: &[f64], days: usize) -> f64 {
    if closes.len() <= days {
        return 0.0;
    }
    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - 1 - days];
    if base == 0.0 {
        return 0.0;
    }
    (last - base) / base * 100.0
}

/// Weighted 0-100 sentiment score:
/// 30% one-day index move, 25% gap prediction, 15% 1d/5d sign agreement,
/// 20% medium-term trend, 10% gap-confidence floor.
fn sentiment_score(
    change_1d: f64,
    change_5d: f64,
    change_7d: f64,
    change_14d: f64,
    gap: &GapPrediction,
) -> f64 {
    let perf = (change_1d.clamp(-2.0, 2.0) + 2.0) / 4.0;
    let gap_component = 0.5 + 0.5 * gap.direction.sign() * gap.confidence;
    let agreement = if change_1d.signum() == change_5d.signum() {
        1.0
    } else {
        0.0
    };
    let trend = ((0.6 * change_7d + 0.4 * change_14d).clamp(-5.0, 5.0) + 5.0) / 10.0;

    let score = 0.30 * perf
        + 0.25 * gap_component
        + 0.15 * agreement
        + 0.20 * trend
        + 0.10 * gap.confidence;

    (score * 100.0).clamp(0.0, 100.0)
}
