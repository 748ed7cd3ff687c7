use crate::{ScreenError, ScreenResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Weight vectors must sum to 1.0 within this tolerance. The tiny slack on
/// top of 1e-6 keeps a sum that is off by exactly the tolerance on the
/// accepted side despite float rounding.
const WEIGHT_SUM_EPS: f64 = 1.0e-6 + 1.0e-12;

/// Typed pipeline configuration loaded from a JSON file. Every key has a
/// default; unknown keys are rejected so a typo never silently alters
/// behavior.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub quote: QuoteConfig,
    pub cache: CacheConfig,
    pub scanner: ScannerConfig,
    pub predictor: PredictorConfig,
    pub scorer: ScorerConfig,
    pub training: TrainingConfig,
    pub regime: RegimeConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QuoteConfig {
    /// Minimum seconds between consecutive provider calls (global throttle).
    pub base_delay_sec: f64,
    pub max_retries: u32,
    /// Base backoff; retry k sleeps `retry_backoff_sec * 2^(k-1)`.
    pub retry_backoff_sec: f64,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            base_delay_sec: 2.0,
            max_retries: 3,
            retry_backoff_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl_info_min: u64,
    pub ttl_candles_min: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            ttl_info_min: 30,
            ttl_candles_min: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScannerConfig {
    pub workers: usize,
    /// Validation gates. `None` falls back to the universe's defaults.
    pub min_market_cap: Option<f64>,
    pub min_avg_volume: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            min_market_cap: None,
            min_avg_volume: None,
            min_price: None,
            max_price: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PredictorWeights {
    pub model: f64,
    pub trend: f64,
    pub technical: f64,
    pub sentiment: f64,
}

impl Default for PredictorWeights {
    fn default() -> Self {
        Self {
            model: 0.45,
            trend: 0.25,
            technical: 0.15,
            sentiment: 0.15,
        }
    }
}

impl PredictorWeights {
    pub fn sum(&self) -> f64 {
        self.model + self.trend + self.technical + self.sentiment
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PredictorConfig {
    pub weights: PredictorWeights,
    pub workers: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            weights: PredictorWeights::default(),
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScorerWeights {
    pub prediction_conf: f64,
    pub technical: f64,
    pub sentiment_align: f64,
    pub liquidity: f64,
    pub volatility: f64,
    pub sector_momentum: f64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            prediction_conf: 0.30,
            technical: 0.20,
            sentiment_align: 0.15,
            liquidity: 0.15,
            volatility: 0.10,
            sector_momentum: 0.10,
        }
    }
}

impl ScorerWeights {
    pub fn sum(&self) -> f64 {
        self.prediction_conf
            + self.technical
            + self.sentiment_align
            + self.liquidity
            + self.volatility
            + self.sector_momentum
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScorerPenalties {
    pub low_volume: f64,
    pub high_volatility: f64,
    pub contrarian: f64,
}

impl Default for ScorerPenalties {
    fn default() -> Self {
        Self {
            low_volume: -10.0,
            high_volatility: -15.0,
            contrarian: -20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScorerBonuses {
    pub fresh_model: f64,
    pub high_hit_rate: f64,
    pub sector_leader: f64,
}

impl Default for ScorerBonuses {
    fn default() -> Self {
        Self {
            fresh_model: 5.0,
            high_hit_rate: 10.0,
            sector_leader: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScorerConfig {
    pub weights: ScorerWeights,
    pub penalties: ScorerPenalties,
    pub bonuses: ScorerBonuses,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TrainingConfig {
    pub enabled: bool,
    pub max_models_per_night: usize,
    pub stale_threshold_days: i64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_models_per_night: 100,
            stale_threshold_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RegimeConfig {
    pub n_states: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self { n_states: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReportConfig {
    pub dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
        }
    }
}

impl Config {
    /// Parse and validate a config file. Any unknown key, unreadable file or
    /// out-of-range value is `ConfigInvalid`.
    pub fn load(path: &Path) -> ScreenResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScreenError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ScreenResult<Self> {
        let config: Config = serde_json::from_str(raw)
            .map_err(|e| ScreenError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ScreenResult<()> {
        let pred_sum = self.predictor.weights.sum();
        if (pred_sum - 1.0).abs() > WEIGHT_SUM_EPS {
            return Err(ScreenError::ConfigInvalid(format!(
                "predictor.weights must sum to 1.0, got {:.7}",
                pred_sum
            )));
        }

        let scorer_sum = self.scorer.weights.sum();
        if (scorer_sum - 1.0).abs() > WEIGHT_SUM_EPS {
            return Err(ScreenError::ConfigInvalid(format!(
                "scorer.weights must sum to 1.0, got {:.7}",
                scorer_sum
            )));
        }

        if self.scanner.workers == 0 {
            return Err(ScreenError::ConfigInvalid(
                "scanner.workers must be at least 1".to_string(),
            ));
        }
        if self.predictor.workers == 0 {
            return Err(ScreenError::ConfigInvalid(
                "predictor.workers must be at least 1".to_string(),
            ));
        }
        if self.quote.base_delay_sec < 0.0 || self.quote.retry_backoff_sec < 0.0 {
            return Err(ScreenError::ConfigInvalid(
                "quote delays must be non-negative".to_string(),
            ));
        }
        if self.cache.ttl_info_min == 0 || self.cache.ttl_candles_min == 0 {
            return Err(ScreenError::ConfigInvalid(
                "cache TTLs must be at least 1 minute".to_string(),
            ));
        }
        if self.training.stale_threshold_days < 1 {
            return Err(ScreenError::ConfigInvalid(
                "training.stale_threshold_days must be at least 1".to_string(),
            ));
        }
        if self.regime.n_states != 3 {
            return Err(ScreenError::ConfigInvalid(format!(
                "regime.n_states: only 3 states are supported, got {}",
                self.regime.n_states
            )));
        }

        Ok(())
    }
}
