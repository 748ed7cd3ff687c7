//! Indicator kernel shared by the scanner and the regime engine.

use screener_core::Candle;
use statrs::statistics::{Data, OrderStatistics};

/// Trading days per year, used to annualize daily volatility.
pub const TRADING_DAYS: f64 = 252.0;

/// Return val if it is finite, otherwise return default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Simple Moving Average over the trailing `period` values.
/// Returns `None` when there is not enough data.
pub fn sma_last(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }
    let sum: f64 = data[data.len() - period..].iter().sum();
    Some(finite_or(sum / period as f64, 0.0))
}

/// Relative Strength Index with Wilder smoothing. Returns the last value,
/// or `None` when fewer than `period + 1` closes are supplied.
pub fn rsi_last(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period + 1 {
        return None;
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);
    for w in data.windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
    }

    let rs = if avg_loss == 0.0 {
        100.0
    } else {
        avg_gain / avg_loss
    };
    Some(finite_or(100.0 - (100.0 / (1.0 + rs)), 50.0))
}

/// Simple close-to-close returns.
pub fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Log returns, used by the regime engine.
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|r| (r - m).powi(2)).sum::<f64>() / data.len() as f64;
    finite_or(variance.sqrt(), 0.0)
}

/// Annualized 30-day volatility: stddev of the last 30 returns scaled by
/// sqrt(252). `None` when fewer than 31 closes are supplied.
pub fn volatility_30d(closes: &[f64]) -> Option<f64> {
    if closes.len() < 31 {
        return None;
    }
    let rets = returns(&closes[closes.len() - 31..]);
    if rets.len() < 30 {
        return None;
    }
    Some(finite_or(std_dev(&rets) * TRADING_DAYS.sqrt(), 0.0))
}

/// Empirical percentile (0-100) of a sample.
pub fn percentile(values: &[f64], p: usize) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut data = Data::new(values.to_vec());
    Some(data.percentile(p))
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50)
}

/// Extract closes from a candle series.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Average volume over the trailing `period` candles (or all of them).
pub fn avg_volume(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }
    let start = candles.len().saturating_sub(period);
    let window = &candles[start..];
    Some(window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64)
}
