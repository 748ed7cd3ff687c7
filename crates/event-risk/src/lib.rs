//! Per-ticker upcoming-event exposure: earnings, dividend ex-dates and
//! regulator-mandated disclosures from a small local calendar, blended with
//! the market regime's crash risk.

use chrono::NaiveDate;
use screener_core::{EventRisk, EventRiskBatch, Regime, ScreenError, ScreenResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Events further out than this many days are ignored.
const EVENT_HORIZON_DAYS: i64 = 14;

/// Regulatory disclosures due within this many days raise the flag.
const REGULATORY_HORIZON_DAYS: i64 = 5;

/// Events inside this window contribute to the risk score.
const NEAR_EVENT_DAYS: i64 = 3;

const SIT_OUT_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickerEvents {
    #[serde(default)]
    pub earnings: Vec<NaiveDate>,
    #[serde(default)]
    pub dividends: Vec<NaiveDate>,
    #[serde(default)]
    pub regulatory: Vec<NaiveDate>,
}

/// Local event calendar, keyed by ticker. An absent calendar is the normal
/// case: event fields stay null and only the regime term contributes.
#[derive(Debug, Clone, Default)]
pub struct EventCalendar {
    entries: HashMap<String, TickerEvents>,
}

impl EventCalendar {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> ScreenResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, TickerEvents> = serde_json::from_str(&raw)
            .map_err(|e| ScreenError::ConfigInvalid(format!("event calendar: {}", e)))?;
        Ok(Self { entries })
    }

    pub fn from_entries(entries: HashMap<String, TickerEvents>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, ticker: &str) -> Option<&TickerEvents> {
        self.entries.get(ticker)
    }
}

pub struct EventRiskGuard {
    calendar: EventCalendar,
}

impl EventRiskGuard {
    pub fn new(calendar: EventCalendar) -> Self {
        Self { calendar }
    }

    /// Assess a batch of tickers against the calendar and current regime.
    /// Results are keyed by ticker; no ordering is guaranteed.
    pub fn assess(&self, tickers: &[String], regime: &Regime, today: NaiveDate) -> EventRiskBatch {
        let per_ticker = tickers
            .iter()
            .map(|ticker| (ticker.clone(), self.assess_one(ticker, regime, today)))
            .collect();

        EventRiskBatch {
            per_ticker,
            market_regime: regime.clone(),
        }
    }

    fn assess_one(&self, ticker: &str, regime: &Regime, today: NaiveDate) -> EventRisk {
        let events = match self.calendar.get(ticker) {
            Some(events) => events,
            None => return EventRisk::from_regime(regime),
        };

        let earnings_in_days = days_to_next(&events.earnings, today, EVENT_HORIZON_DAYS);
        let dividend_in_days = days_to_next(&events.dividends, today, EVENT_HORIZON_DAYS);
        let regulatory_flag =
            days_to_next(&events.regulatory, today, REGULATORY_HORIZON_DAYS).is_some();

        let earnings_near = matches!(earnings_in_days, Some(d) if d <= NEAR_EVENT_DAYS);
        let dividend_near = matches!(dividend_in_days, Some(d) if d <= NEAR_EVENT_DAYS);

        let risk_score = (0.05 * f64::from(earnings_near as u8)
            + 0.02 * f64::from(dividend_near as u8)
            + 0.04 * f64::from(regulatory_flag as u8)
            + 0.10 * regime.crash_risk)
            .clamp(0.0, 1.0);

        EventRisk {
            earnings_in_days,
            dividend_in_days,
            regulatory_flag,
            risk_score,
            sit_out: risk_score >= SIT_OUT_THRESHOLD,
        }
    }
}

/// Days until the next event on or after `today`, if one falls inside the
/// horizon.
fn days_to_next(dates: &[NaiveDate], today: NaiveDate, horizon_days: i64) -> Option<i64> {
    dates
        .iter()
        .filter_map(|d| {
            let days = (*d - today).num_days();
            (0..=horizon_days).contains(&days).then_some(days)
        })
        .min()
}
