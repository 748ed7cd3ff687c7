//! Volatility-regime classifier for the primary index.
//!
//! Three states over rolling annualized volatility, partitioned at the 33rd
//! and 66th percentiles of the last year of rolling vols. States map to
//! {CALM, NORMAL, HIGH_VOL} by ascending variance; crash risk couples the
//! high-vol occupancy with how negative returns are inside that state.

use screener_core::{Regime, RegimeLabel, ScreenError, ScreenResult};
use technical_indicators::{log_returns, mean, percentile, std_dev, TRADING_DAYS};

/// Minimum index closes needed to fit.
const MIN_CLOSES: usize = 60;

/// Rolling window for the vol series, in trading days.
const VOL_WINDOW: usize = 20;

/// Percentile thresholds are computed over at most this many rolling vols.
const LOOKBACK: usize = 252;

/// Occupancy probabilities are computed over this many recent rolling vols.
const OCCUPANCY_WINDOW: usize = 60;

pub struct RegimeEngine;

impl RegimeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Classify the current regime from index closes (oldest first).
    pub fn classify(&self, closes: &[f64]) -> ScreenResult<Regime> {
        if closes.len() < MIN_CLOSES {
            return Err(ScreenError::RegimeFitFailed(format!(
                "need {} index closes, got {}",
                MIN_CLOSES,
                closes.len()
            )));
        }

        let rets = log_returns(closes);
        if rets.len() < VOL_WINDOW + 1 {
            return Err(ScreenError::RegimeFitFailed(
                "too few usable returns after filtering".to_string(),
            ));
        }

        // Rolling annualized vol, one value per day from the first full window.
        let mut vols = Vec::with_capacity(rets.len() - VOL_WINDOW + 1);
        for end in VOL_WINDOW..=rets.len() {
            let window = &rets[end - VOL_WINDOW..end];
            vols.push(std_dev(window) * TRADING_DAYS.sqrt());
        }

        let lookback_start = vols.len().saturating_sub(LOOKBACK);
        let lookback = &vols[lookback_start..];
        let q33 = percentile(lookback, 33)
            .ok_or_else(|| ScreenError::RegimeFitFailed("empty vol series".to_string()))?;
        let q66 = percentile(lookback, 66)
            .ok_or_else(|| ScreenError::RegimeFitFailed("empty vol series".to_string()))?;

        let bucket = |vol: f64| -> usize {
            if vol <= q33 {
                0
            } else if vol <= q66 {
                1
            } else {
                2
            }
        };

        let current_vol = *vols.last().unwrap();
        let label = match bucket(current_vol) {
            0 => RegimeLabel::Calm,
            1 => RegimeLabel::Normal,
            _ => RegimeLabel::HighVol,
        };

        // Occupancy over the recent window is the probability estimate.
        let occ_start = vols.len().saturating_sub(OCCUPANCY_WINDOW);
        let recent = &vols[occ_start..];
        let mut counts = [0usize; 3];
        for &vol in recent {
            counts[bucket(vol)] += 1;
        }
        let total = recent.len() as f64;
        let state_probs = [
            counts[0] as f64 / total,
            counts[1] as f64 / total,
            counts[2] as f64 / total,
        ];

        // Returns on days whose rolling vol sits in the high state. The vol
        // at index i covers the return at index i + VOL_WINDOW - 1.
        let high_rets: Vec<f64> = vols
            .iter()
            .enumerate()
            .filter(|(_, &vol)| bucket(vol) == 2)
            .map(|(i, _)| rets[i + VOL_WINDOW - 1])
            .collect();

        let downside_ratio = if high_rets.len() >= 2 {
            let mu = mean(&high_rets);
            let sigma = std_dev(&high_rets);
            if sigma > 0.0 {
                (-mu / sigma).max(0.0)
            } else {
                0.0
            }
        } else {
            0.0
        };

        let crash_risk = (state_probs[2] * (1.0 + downside_ratio)).clamp(0.0, 1.0);

        let daily_vol = std_dev(&rets);
        Ok(Regime {
            label,
            state_probs,
            daily_vol,
            annual_vol: daily_vol * TRADING_DAYS.sqrt(),
            crash_risk,
        })
    }
}

impl Default for RegimeEngine {
    fn default() -> Self {
        Self::new()
    }
}
