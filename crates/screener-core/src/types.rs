use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// One OHLCV candle. Series are ordered by `ts` ascending with no duplicate
/// timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle interval requested from the quote provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleInterval {
    Daily,
    Weekly,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::Daily => "1d",
            CandleInterval::Weekly => "1wk",
        }
    }
}

/// History window requested from the quote provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryPeriod {
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
}

impl HistoryPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryPeriod::OneMonth => "1mo",
            HistoryPeriod::ThreeMonths => "3mo",
            HistoryPeriod::SixMonths => "6mo",
            HistoryPeriod::OneYear => "1y",
        }
    }

    /// Approximate calendar days covered by the period.
    pub fn days(&self) -> i64 {
        match self {
            HistoryPeriod::OneMonth => 31,
            HistoryPeriod::ThreeMonths => 92,
            HistoryPeriod::SixMonths => 183,
            HistoryPeriod::OneYear => 366,
        }
    }
}

/// Reference data returned by the quote provider's info endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteInfo {
    pub market_cap: Option<f64>,
    pub avg_volume: Option<f64>,
    pub price: Option<f64>,
    pub beta: Option<f64>,
}

/// Per-ticker fundamentals and technicals computed by the scanner.
/// Indicator fields are `None` when the series is too short (<20 candles for
/// MA20, <50 for MA50, <15 for RSI-14, <31 for 30-day volatility).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerInfo {
    pub ticker: String,
    pub sector_name: String,
    pub sector_weight: f64,
    pub market_cap: Option<f64>,
    pub avg_volume: Option<f64>,
    pub price: Option<f64>,
    pub beta: Option<f64>,
    pub rsi_14: Option<f64>,
    pub ma_20: Option<f64>,
    pub ma_50: Option<f64>,
    pub volatility_30d: Option<f64>,
}

/// A ticker that passed scanning: info, screening score and the candle
/// series the downstream predictor reuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedTicker {
    pub info: TickerInfo,
    /// 0-100 pre-prediction quality score.
    pub screening_score: f64,
    /// The 0-15 technical sub-score, kept for the opportunity scorer.
    pub technical_subscore: f64,
    pub candles: Vec<Candle>,
}

/// Direction of the predicted overnight gap of the primary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapDirection {
    Up,
    Down,
    Flat,
}

impl GapDirection {
    pub fn sign(&self) -> f64 {
        match self {
            GapDirection::Up => 1.0,
            GapDirection::Down => -1.0,
            GapDirection::Flat => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapPrediction {
    /// Expected open gap of the primary index, percent.
    pub pct: f64,
    pub confidence: f64,
    pub direction: GapDirection,
}

/// Market stance derived from the sentiment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stance {
    #[serde(rename = "STRONG_BUY")]
    StrongBuy,
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "STRONG_SELL")]
    StrongSell,
}

impl Stance {
    /// Map a 0-100 sentiment score to a stance.
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            Stance::StrongBuy
        } else if score >= 60.0 {
            Stance::Buy
        } else if score >= 40.0 {
            Stance::Hold
        } else if score >= 30.0 {
            Stance::Sell
        } else {
            Stance::StrongSell
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stance::StrongBuy => "STRONG_BUY",
            Stance::Buy => "BUY",
            Stance::Hold => "HOLD",
            Stance::Sell => "SELL",
            Stance::StrongSell => "STRONG_SELL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub stance: Stance,
}

/// Index-level market context produced once per run by the market monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSentiment {
    pub index_change_1d: f64,
    pub index_change_5d: f64,
    pub index_change_7d: f64,
    pub index_change_14d: f64,
    pub vol_gauge_level: Option<f64>,
    pub gap_prediction: GapPrediction,
    pub sentiment_score: f64,
    pub recommendation: Recommendation,
}

impl MarketSentiment {
    /// Neutral snapshot used when the index cannot be fetched.
    pub fn neutral() -> Self {
        Self {
            index_change_1d: 0.0,
            index_change_5d: 0.0,
            index_change_7d: 0.0,
            index_change_14d: 0.0,
            vol_gauge_level: None,
            gap_prediction: GapPrediction {
                pct: 0.0,
                confidence: 0.5,
                direction: GapDirection::Flat,
            },
            sentiment_score: 50.0,
            recommendation: Recommendation {
                stance: Stance::Hold,
            },
        }
    }
}

/// Volatility regime of the index, with a crash-risk scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeLabel {
    #[serde(rename = "CALM")]
    Calm,
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "HIGH_VOL")]
    HighVol,
}

impl RegimeLabel {
    pub fn label(&self) -> &'static str {
        match self {
            RegimeLabel::Calm => "CALM",
            RegimeLabel::Normal => "NORMAL",
            RegimeLabel::HighVol => "HIGH_VOL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Regime {
    pub label: RegimeLabel,
    /// Occupancy probabilities for [CALM, NORMAL, HIGH_VOL].
    pub state_probs: [f64; 3],
    pub daily_vol: f64,
    pub annual_vol: f64,
    pub crash_risk: f64,
}

impl Regime {
    /// Default regime used when classification fails.
    pub fn neutral() -> Self {
        Self {
            label: RegimeLabel::Normal,
            state_probs: [0.33, 0.34, 0.33],
            daily_vol: 0.0,
            annual_vol: 0.0,
            crash_risk: 0.5,
        }
    }
}

/// Per-ticker upcoming-event exposure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRisk {
    pub earnings_in_days: Option<i64>,
    pub dividend_in_days: Option<i64>,
    pub regulatory_flag: bool,
    pub risk_score: f64,
    pub sit_out: bool,
}

impl EventRisk {
    /// Risk with no calendar data: only the regime term contributes.
    pub fn from_regime(regime: &Regime) -> Self {
        let risk = (0.10 * regime.crash_risk).clamp(0.0, 1.0);
        Self {
            earnings_in_days: None,
            dividend_in_days: None,
            regulatory_flag: false,
            risk_score: risk,
            sit_out: risk >= 0.7,
        }
    }
}

/// Result of one event-risk batch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRiskBatch {
    pub per_ticker: HashMap<String, EventRisk>,
    pub market_regime: Regime,
}

impl EventRiskBatch {
    pub fn get(&self, ticker: &str) -> Option<&EventRisk> {
        self.per_ticker.get(ticker)
    }
}

/// One ensemble component: a direction in [-1, 1] and a confidence in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Component {
    pub direction: f64,
    pub confidence: f64,
    pub available: bool,
}

impl Component {
    pub fn unavailable() -> Self {
        Self {
            direction: 0.0,
            confidence: 0.0,
            available: false,
        }
    }

    pub fn new(direction: f64, confidence: f64) -> Self {
        Self {
            direction: direction.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            available: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionComponents {
    pub model: Component,
    pub trend: Component,
    pub technical: Component,
    pub sentiment: Component,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "HOLD")]
    Hold,
}

impl Signal {
    pub fn label(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        }
    }
}

/// Ensemble prediction for one scanned ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub ticker: String,
    pub components: PredictionComponents,
    pub signal: Signal,
    pub ensemble_direction: f64,
    pub ensemble_confidence: f64,
}

impl Prediction {
    /// Degraded prediction emitted when a ticker fails inside the fan-out.
    pub fn hold(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            components: PredictionComponents {
                model: Component::unavailable(),
                trend: Component::unavailable(),
                technical: Component::unavailable(),
                sentiment: Component::unavailable(),
            },
            signal: Signal::Hold,
            ensemble_direction: 0.0,
            ensemble_confidence: 0.0,
        }
    }
}

/// Direction estimate returned by a direction model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DirectionEstimate {
    /// [-1, 1]; positive means up.
    pub direction: f64,
    /// [0, 1].
    pub confidence: f64,
}

/// Sidecar metadata stored next to a model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMeta {
    pub trained_at: DateTime<Utc>,
    #[serde(default)]
    pub hit_rate: Option<f64>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Model facts the scorer needs, resolved against the run date so scoring
/// stays deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelBadge {
    pub artifact_age_days: Option<i64>,
    pub hit_rate: Option<f64>,
}

/// Sentiment reading for one ticker from the news analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSentiment {
    pub label: SentimentLabel,
    pub confidence: f64,
    pub article_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn sign(&self) -> f64 {
        match self {
            SentimentLabel::Positive => 1.0,
            SentimentLabel::Negative => -1.0,
            SentimentLabel::Neutral => 0.0,
        }
    }
}

/// Opportunity band for the morning report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MED")]
    Med,
    #[serde(rename = "LOW")]
    Low,
}

impl Band {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Band::High
        } else if score >= 65.0 {
            Band::Med
        } else {
            Band::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Band::High => "HIGH",
            Band::Med => "MED",
            Band::Low => "LOW",
        }
    }
}

/// Final scored entry that drives the morning report ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredStock {
    pub ticker: String,
    pub sector: String,
    pub price: Option<f64>,
    pub screening_score: f64,
    pub prediction: Prediction,
    pub opportunity_score: f64,
    pub opportunity_band: Band,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportPaths {
    pub html: Option<PathBuf>,
    pub csv: Option<PathBuf>,
}

/// Snapshot of a whole nightly run, written once per date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_sec: f64,
    /// Phase name -> elapsed wall-clock seconds.
    pub phase_timings: BTreeMap<String, f64>,
    pub universe_name: String,
    pub scanned_count: usize,
    pub predicted_count: usize,
    /// Up to 20 entries, ordered by opportunity score descending.
    pub top_opportunities: Vec<ScoredStock>,
    pub market_sentiment: MarketSentiment,
    pub regime: Regime,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub cancelled: bool,
    pub report_paths: ReportPaths,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stance_thresholds() {
        assert_eq!(Stance::from_score(75.0), Stance::StrongBuy);
        assert_eq!(Stance::from_score(70.0), Stance::StrongBuy);
        assert_eq!(Stance::from_score(65.0), Stance::Buy);
        assert_eq!(Stance::from_score(50.0), Stance::Hold);
        assert_eq!(Stance::from_score(35.0), Stance::Sell);
        assert_eq!(Stance::from_score(29.9), Stance::StrongSell);
    }

    #[test]
    fn band_thresholds() {
        assert_eq!(Band::from_score(80.0), Band::High);
        assert_eq!(Band::from_score(79.9), Band::Med);
        assert_eq!(Band::from_score(65.0), Band::Med);
        assert_eq!(Band::from_score(64.9), Band::Low);
    }

    #[test]
    fn neutral_sentiment_is_hold_flat() {
        let s = MarketSentiment::neutral();
        assert_eq!(s.sentiment_score, 50.0);
        assert_eq!(s.recommendation.stance, Stance::Hold);
        assert_eq!(s.gap_prediction.direction, GapDirection::Flat);
    }

    #[test]
    fn event_risk_from_regime_only() {
        let mut regime = Regime::neutral();
        regime.crash_risk = 0.85;
        let risk = EventRisk::from_regime(&regime);
        assert!((risk.risk_score - 0.085).abs() < 1e-12);
        assert!(!risk.sit_out);
        assert!(risk.earnings_in_days.is_none());
    }

    #[test]
    fn pipeline_state_round_trips_through_json() {
        let state = PipelineState {
            date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_sec: 12.5,
            phase_timings: BTreeMap::from([
                ("scan".to_string(), 8.0),
                ("predict".to_string(), 3.0),
            ]),
            universe_name: "au".to_string(),
            scanned_count: 5,
            predicted_count: 5,
            top_opportunities: vec![],
            market_sentiment: MarketSentiment::neutral(),
            regime: Regime::neutral(),
            errors: vec![],
            warnings: vec!["RateLimited(NAB.AX)".to_string()],
            cancelled: false,
            report_paths: ReportPaths::default(),
        };

        let json = serde_json::to_string(&state).unwrap();
        let back: PipelineState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.date, state.date);
        assert_eq!(back.phase_timings, state.phase_timings);
        assert_eq!(back.warnings, state.warnings);
        assert_eq!(back.scanned_count, 5);
    }
}
