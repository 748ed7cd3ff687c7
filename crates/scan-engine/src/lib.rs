//! Universe scanner: cache-first data fetch, validation gates, technical
//! indicators and the 0-100 screening score, fanned out over a bounded
//! worker pool.
//!
//! Per-ticker failures never abort a scan; the ticker is dropped and a
//! warning recorded. Scoring happens after the fan-out drains because two
//! sub-scores are cross-sectional (volatility median, sector weight scale).

use disk_cache::{CacheKey, DiskCache};
use quote_client::QuoteClient;
use screener_core::{
    Candle, CandleInterval, HistoryPeriod, QuoteInfo, ScannedTicker, ScannerConfig, ScreenError,
    TickerInfo, Universe, ValidationGates,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Candles required before a ticker is scannable at all.
const MIN_CANDLES: usize = 14;

/// Volume window for the computed average when the provider omits it.
const VOLUME_WINDOW: usize = 30;

pub struct ScanOutcome {
    pub scanned: Vec<ScannedTicker>,
    pub warnings: Vec<String>,
}

/// Merge config gate overrides over the universe defaults.
pub fn resolve_gates(config: &ScannerConfig, universe: &Universe) -> ValidationGates {
    ValidationGates {
        min_market_cap: config.min_market_cap.unwrap_or(universe.gates.min_market_cap),
        min_avg_volume: config.min_avg_volume.unwrap_or(universe.gates.min_avg_volume),
        min_price: config.min_price.unwrap_or(universe.gates.min_price),
        max_price: config.max_price.unwrap_or(universe.gates.max_price),
    }
}

pub struct Scanner {
    quotes: Arc<QuoteClient>,
    cache: Arc<DiskCache>,
    workers: usize,
    gates: ValidationGates,
}

impl Scanner {
    pub fn new(
        quotes: Arc<QuoteClient>,
        cache: Arc<DiskCache>,
        workers: usize,
        gates: ValidationGates,
    ) -> Self {
        Self {
            quotes,
            cache,
            workers: workers.max(1),
            gates,
        }
    }

    pub async fn scan(&self, universe: &Universe, cancel: &CancellationToken) -> ScanOutcome {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<Result<Partial, (String, String)>> = JoinSet::new();
        let mut warnings = Vec::new();

        'outer: for sector in &universe.sectors {
            for ticker in &sector.tickers {
                // Drain on cancel: stop queuing; in-flight tickers finish so
                // no cache entry is left half-written.
                if cancel.is_cancelled() {
                    tracing::info!("scan cancelled; draining in-flight tickers");
                    break 'outer;
                }

                let quotes = Arc::clone(&self.quotes);
                let cache = Arc::clone(&self.cache);
                let semaphore = Arc::clone(&semaphore);
                let gates = self.gates;
                let ticker = ticker.clone();
                let sector_name = sector.name.clone();
                let sector_weight = sector.weight;

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    scan_one(&quotes, &cache, &gates, ticker, sector_name, sector_weight).await
                });
            }
        }

        let mut partials = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(partial)) => partials.push(partial),
                Ok(Err((ticker, reason))) => {
                    tracing::warn!("dropping {}: {}", ticker, reason);
                    warnings.push(format!("{}: {}", ticker, reason));
                }
                Err(e) => {
                    tracing::warn!("scan task failed: {}", e);
                    warnings.push(format!("scan task failed: {}", e));
                }
            }
        }

        let scanned = finalize_scores(partials, universe);

        ScanOutcome { scanned, warnings }
    }
}

struct Partial {
    info: TickerInfo,
    candles: Vec<Candle>,
}

async fn scan_one(
    quotes: &QuoteClient,
    cache: &DiskCache,
    gates: &ValidationGates,
    ticker: String,
    sector_name: String,
    sector_weight: f64,
) -> Result<Partial, (String, String)> {
    let candles = fetch_candles_cached(quotes, cache, &ticker)
        .await
        .map_err(|e| (ticker.clone(), e.to_string()))?;

    if candles.len() < MIN_CANDLES {
        return Err((
            ticker,
            format!("insufficient data: {} candles", candles.len()),
        ));
    }

    let info = fetch_info_cached(quotes, cache, &ticker).await;

    let closes = technical_indicators::closes(&candles);
    let price = info
        .price
        .or_else(|| closes.last().copied())
        .filter(|p| p.is_finite());

    let avg_volume = info
        .avg_volume
        .or_else(|| technical_indicators::avg_volume(&candles, VOLUME_WINDOW));

    // Validation gates. Price is always known at this point; the
    // fundamental gates only apply when the provider reported a value.
    let price_val = price.ok_or_else(|| (ticker.clone(), "no usable price".to_string()))?;
    if price_val < gates.min_price || price_val > gates.max_price {
        return Err((
            ticker,
            format!(
                "price {:.2} outside [{:.2}, {:.2}]",
                price_val, gates.min_price, gates.max_price
            ),
        ));
    }
    if let Some(mc) = info.market_cap {
        if mc < gates.min_market_cap {
            return Err((
                ticker,
                format!("market cap {:.0} below {:.0}", mc, gates.min_market_cap),
            ));
        }
    }
    if let Some(v) = avg_volume {
        if v < gates.min_avg_volume {
            return Err((
                ticker,
                format!("avg volume {:.0} below {:.0}", v, gates.min_avg_volume),
            ));
        }
    }

    let info = TickerInfo {
        ticker,
        sector_name,
        sector_weight,
        market_cap: info.market_cap,
        avg_volume,
        price,
        beta: info.beta,
        rsi_14: technical_indicators::rsi_last(&closes, 14),
        ma_20: technical_indicators::sma_last(&closes, 20),
        ma_50: technical_indicators::sma_last(&closes, 50),
        volatility_30d: technical_indicators::volatility_30d(&closes),
    };

    Ok(Partial { info, candles })
}

async fn fetch_candles_cached(
    quotes: &QuoteClient,
    cache: &DiskCache,
    ticker: &str,
) -> Result<Vec<Candle>, ScreenError> {
    let key = CacheKey::candles(ticker, CandleInterval::Daily);
    if let Some(payload) = cache.get(&key) {
        match serde_json::from_slice::<Vec<Candle>>(&payload) {
            Ok(candles) => return Ok(candles),
            Err(e) => tracing::warn!("{}: unreadable cached candles ({}), refetching", ticker, e),
        }
    }

    let candles = quotes
        .fetch_candles(ticker, HistoryPeriod::ThreeMonths, CandleInterval::Daily)
        .await?;

    if let Ok(payload) = serde_json::to_vec(&candles) {
        if let Err(e) = cache.put(&key, &payload) {
            tracing::warn!("{}: cache write failed: {}", ticker, e);
        }
    }

    Ok(candles)
}

/// Info is best-effort: a failed info fetch degrades to empty fields rather
/// than dropping the ticker.
async fn fetch_info_cached(quotes: &QuoteClient, cache: &DiskCache, ticker: &str) -> QuoteInfo {
    let key = CacheKey::info(ticker);
    if let Some(payload) = cache.get(&key) {
        if let Ok(info) = serde_json::from_slice::<QuoteInfo>(&payload) {
            return info;
        }
    }

    match quotes.fetch_info(ticker).await {
        Ok(info) => {
            if let Ok(payload) = serde_json::to_vec(&info) {
                let _ = cache.put(&key, &payload);
            }
            info
        }
        Err(e) => {
            tracing::debug!("{}: info unavailable ({}), using candle-derived fields", ticker, e);
            QuoteInfo::default()
        }
    }
}

/// Second pass: cross-sectional sub-scores and the final screening score.
fn finalize_scores(partials: Vec<Partial>, universe: &Universe) -> Vec<ScannedTicker> {
    let vols: Vec<f64> = partials
        .iter()
        .filter_map(|p| p.info.volatility_30d)
        .collect();
    let median_vol = technical_indicators::median(&vols);

    let max_sector_weight = universe
        .sectors
        .iter()
        .map(|s| s.weight)
        .fold(1.4f64, f64::max);

    let mut scanned: Vec<ScannedTicker> = partials
        .into_iter()
        .map(|p| {
            let (score, technical) = screening_score(&p.info, median_vol, max_sector_weight);
            ScannedTicker {
                info: p.info,
                screening_score: score,
                technical_subscore: technical,
                candles: p.candles,
            }
        })
        .collect();

    // Deterministic output order; downstream phases key by ticker anyway.
    scanned.sort_by(|a, b| a.info.ticker.cmp(&b.info.ticker));
    scanned
}

/// The six documented sub-scores. Returns (total, technical sub-score).
fn screening_score(info: &TickerInfo, median_vol: Option<f64>, max_weight: f64) -> (f64, f64) {
    // Liquidity (0-20): log-scaled between 1e4 and 1e8 shares/day.
    let liquidity = match info.avg_volume {
        Some(v) if v > 0.0 => 20.0 * ((v.log10() - 4.0) / 4.0).clamp(0.0, 1.0),
        _ => 0.0,
    };

    // Market cap (0-20): log-scaled between 1e8 and 1e12.
    let market_cap = match info.market_cap {
        Some(mc) if mc > 0.0 => 20.0 * ((mc.log10() - 8.0) / 4.0).clamp(0.0, 1.0),
        _ => 0.0,
    };

    // Volatility (0-15): inverted beta; an unreported beta scores mid-range.
    let volatility = match info.beta {
        Some(beta) => 15.0 * (1.0 - beta / 2.0).clamp(0.0, 1.0),
        None => 7.5,
    };

    // Momentum (0-15): price above MA20, above MA50, MA20 above MA50.
    let mut momentum = 0.0;
    if let (Some(price), Some(ma20)) = (info.price, info.ma_20) {
        if price > ma20 {
            momentum += 5.0;
        }
    }
    if let (Some(price), Some(ma50)) = (info.price, info.ma_50) {
        if price > ma50 {
            momentum += 5.0;
        }
    }
    if let (Some(ma20), Some(ma50)) = (info.ma_20, info.ma_50) {
        if ma20 > ma50 {
            momentum += 5.0;
        }
    }

    // Technical (0-15): RSI in the healthy band, volatility below universe median.
    let mut technical = 0.0;
    if let Some(rsi) = info.rsi_14 {
        if (30.0..=70.0).contains(&rsi) {
            technical += 7.5;
        }
    }
    if let (Some(vol), Some(median)) = (info.volatility_30d, median_vol) {
        if vol < median {
            technical += 7.5;
        }
    }

    // Sector weight (0-15), scaled so the heaviest allowed sector maxes out.
    let sector = info.sector_weight * 15.0 / max_weight;

    let total = (liquidity + market_cap + volatility + momentum + technical + sector)
        .clamp(0.0, 100.0);
    (total, technical)
}
