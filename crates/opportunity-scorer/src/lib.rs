//! Final opportunity scoring: prediction + scanner metrics + market context
//! + event risk, folded into one 0-100 ranking number.
//!
//! The scorer performs no I/O and reads no clocks; identical inputs produce
//! byte-identical output. Model freshness arrives pre-resolved against the
//! run date as [`ModelBadge`] values.

use screener_core::{
    Band, EventRisk, EventRiskBatch, MarketSentiment, ModelBadge, Prediction, Regime,
    ScannedTicker, ScoredStock, ScorerConfig, Signal, ValidationGates,
};
use std::collections::HashMap;

/// Volatility above this is penalized outright.
const HIGH_VOL_THRESHOLD: f64 = 0.5;

/// Volatility factor saturates at this annualized level.
const VOL_FACTOR_SCALE: f64 = 0.6;

/// Volume within this multiple of the validation floor is considered thin.
const LOW_VOLUME_MARGIN: f64 = 1.25;

/// Market-direction confidence needed before the contrarian penalty applies.
const CONTRARIAN_CONFIDENCE_MIN: f64 = 0.7;

/// Model artifacts at most this old earn the freshness bonus.
const FRESH_MODEL_MAX_AGE_DAYS: i64 = 2;

const HIGH_HIT_RATE_MIN: f64 = 0.6;

pub struct ScoreInputs<'a> {
    pub predictions: &'a [Prediction],
    pub scanned: &'a [ScannedTicker],
    pub sentiment: &'a MarketSentiment,
    /// Backs the risk deduction for tickers the event-risk batch has no
    /// entry for.
    pub regime: &'a Regime,
    pub event_risks: &'a EventRiskBatch,
    pub badges: &'a HashMap<String, ModelBadge>,
    pub gates: &'a ValidationGates,
    pub config: &'a ScorerConfig,
}

/// Score every predicted ticker. The result is ordered by opportunity score
/// descending, ties broken by ticker ascending; tickers flagged sit-out are
/// forced to HOLD.
pub fn score(inputs: ScoreInputs<'_>) -> Vec<ScoredStock> {
    let by_ticker: HashMap<&str, &ScannedTicker> = inputs
        .scanned
        .iter()
        .map(|s| (s.info.ticker.as_str(), s))
        .collect();

    // Cross-sectional context: per-sector screening medians and maxima, and
    // the universe's 90th-percentile volume for the liquidity scale.
    let mut sector_scores: HashMap<&str, Vec<f64>> = HashMap::new();
    for s in inputs.scanned {
        sector_scores
            .entry(s.info.sector_name.as_str())
            .or_default()
            .push(s.screening_score);
    }
    let sector_median: HashMap<&str, f64> = sector_scores
        .iter()
        .map(|(name, scores)| (*name, technical_indicators::median(scores).unwrap_or(0.0)))
        .collect();
    let sector_max: HashMap<&str, f64> = sector_scores
        .iter()
        .map(|(name, scores)| (*name, scores.iter().cloned().fold(f64::MIN, f64::max)))
        .collect();

    let volumes: Vec<f64> = inputs
        .scanned
        .iter()
        .filter_map(|s| s.info.avg_volume)
        .filter(|v| *v > 0.0)
        .collect();
    let p90_volume = technical_indicators::percentile(&volumes, 90);

    let mut scored: Vec<ScoredStock> = inputs
        .predictions
        .iter()
        .filter_map(|prediction| {
            let stock = by_ticker.get(prediction.ticker.as_str())?;
            Some(score_one(
                prediction,
                stock,
                &inputs,
                &sector_median,
                &sector_max,
                p90_volume,
            ))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.opportunity_score
            .partial_cmp(&a.opportunity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });

    scored
}

fn score_one(
    prediction: &Prediction,
    stock: &ScannedTicker,
    inputs: &ScoreInputs<'_>,
    sector_median: &HashMap<&str, f64>,
    sector_max: &HashMap<&str, f64>,
    p90_volume: Option<f64>,
) -> ScoredStock {
    let info = &stock.info;
    let weights = &inputs.config.weights;
    let market_sign = inputs.sentiment.gap_prediction.direction.sign();
    let prediction_sign = prediction.ensemble_direction.signum();

    // Six factors, each normalized to [0, 1].
    let f_confidence = prediction.ensemble_confidence.clamp(0.0, 1.0);

    let f_technical = (stock.technical_subscore / 15.0).clamp(0.0, 1.0);

    // A flat market direction imposes no misalignment.
    let f_alignment = if market_sign == 0.0 || prediction_sign == market_sign {
        1.0
    } else {
        0.25
    };

    let f_liquidity = match (info.avg_volume, p90_volume) {
        (Some(v), Some(p90)) if v > 0.0 && p90 > 1.0 => (v.log10() / p90.log10()).min(1.0),
        _ => 0.0,
    };

    let f_volatility = match info.volatility_30d {
        Some(vol) => 1.0 - (vol / VOL_FACTOR_SCALE).clamp(0.0, 1.0),
        None => 0.5,
    };

    let f_sector = sector_median
        .get(info.sector_name.as_str())
        .map(|m| (m / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.0);

    let mut score = 100.0
        * (weights.prediction_conf * f_confidence
            + weights.technical * f_technical
            + weights.sentiment_align * f_alignment
            + weights.liquidity * f_liquidity
            + weights.volatility * f_volatility
            + weights.sector_momentum * f_sector);

    // Penalties, each applied at most once.
    let penalties = &inputs.config.penalties;
    if let Some(v) = info.avg_volume {
        if v < inputs.gates.min_avg_volume * LOW_VOLUME_MARGIN {
            score += penalties.low_volume;
        }
    }
    if matches!(info.volatility_30d, Some(vol) if vol > HIGH_VOL_THRESHOLD) {
        score += penalties.high_volatility;
    }
    let contrarian = market_sign != 0.0
        && prediction_sign != 0.0
        && prediction_sign != market_sign
        && inputs.sentiment.gap_prediction.confidence >= CONTRARIAN_CONFIDENCE_MIN;
    if contrarian {
        score += penalties.contrarian;
    }

    // Bonuses, each applied at most once.
    let bonuses = &inputs.config.bonuses;
    let badge = inputs
        .badges
        .get(&prediction.ticker)
        .copied()
        .unwrap_or_default();
    if matches!(badge.artifact_age_days, Some(age) if age <= FRESH_MODEL_MAX_AGE_DAYS) {
        score += bonuses.fresh_model;
    }
    if matches!(badge.hit_rate, Some(rate) if rate >= HIGH_HIT_RATE_MIN) {
        score += bonuses.high_hit_rate;
    }
    if let Some(max) = sector_max.get(info.sector_name.as_str()) {
        if stock.screening_score >= *max {
            score += bonuses.sector_leader;
        }
    }

    // Regime and event exposure. A ticker missing from the batch falls
    // back to the regime-only risk, matching what the guard computes for
    // tickers it has no calendar entry for.
    let event_risk = inputs
        .event_risks
        .get(&prediction.ticker)
        .cloned()
        .unwrap_or_else(|| EventRisk::from_regime(inputs.regime));
    score -= event_risk.risk_score * 10.0;

    let opportunity_score = score.clamp(0.0, 100.0);

    // Sit-out forces the published signal to HOLD regardless of prediction.
    let mut prediction = prediction.clone();
    if event_risk.sit_out {
        prediction.signal = Signal::Hold;
    }

    ScoredStock {
        ticker: prediction.ticker.clone(),
        sector: info.sector_name.clone(),
        price: info.price,
        screening_score: stock.screening_score,
        prediction,
        opportunity_score,
        opportunity_band: Band::from_score(opportunity_score),
    }
}
