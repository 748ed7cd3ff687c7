//! Pipeline orchestrator: drives the nightly phases in order, keeps every
//! per-ticker failure inside its phase, and publishes one state file per
//! run date.
//!
//! Phase map (strictly sequential; fan-out only inside a phase):
//!   1    market monitor        -> sentiment + gap
//!   2    scanner               -> scanned tickers
//!   2.5  regime + event risk   -> market context
//!   3    batch predictor       -> predictions
//!   4    scorer                -> ranked opportunities
//!   4.5  training queue        -> best-effort retrains
//!   5    reporter              -> html + csv
//!   6    state writer          -> <date>_pipeline_state.json

pub mod state;

use batch_predictor::{training, BatchPredictor, ModelStore};
use chrono::{NaiveDate, Utc};
use disk_cache::DiskCache;
use event_risk::{EventCalendar, EventRiskGuard};
use market_monitor::MarketMonitor;
use opportunity_scorer::ScoreInputs;
use quote_client::QuoteClient;
use regime_engine::RegimeEngine;
use report_gen::{ReportContext, Reporter};
use scan_engine::{resolve_gates, Scanner};
use screener_core::{
    CandleInterval, Config, HistoryPeriod, MarketSentiment, ModelBadge, ModelLoader, ModelTrainer,
    NewsAnalyzer, PipelineState, QuoteProvider, Regime, ReportPaths, ScoredStock, ScreenError,
    ScreenResult, Universe,
};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Entries kept in the state file's top-opportunities list.
const TOP_OPPORTUNITIES: usize = 20;

/// External collaborators the orchestrator wires into the phases. Every one
/// of them is optional except the quote provider; absent capabilities
/// degrade per the error policy instead of failing the run.
pub struct PipelineDeps {
    pub provider: Arc<dyn QuoteProvider>,
    pub model_loader: Option<Arc<dyn ModelLoader>>,
    pub analyzer: Option<Arc<dyn NewsAnalyzer>>,
    pub trainer: Option<Arc<dyn ModelTrainer>>,
    pub calendar: EventCalendar,
    pub model_dir: PathBuf,
}

pub struct Orchestrator {
    config: Config,
    deps: PipelineDeps,
    cancel: CancellationToken,
}

struct PhaseClock {
    timings: BTreeMap<String, f64>,
}

impl PhaseClock {
    fn new() -> Self {
        Self {
            timings: BTreeMap::new(),
        }
    }

    async fn run<T, Fut>(&mut self, name: &str, fut: Fut) -> T
    where
        Fut: std::future::Future<Output = T>,
    {
        tracing::info!("phase {} starting", name);
        let started = Instant::now();
        let out = fut.await;
        let elapsed = started.elapsed().as_secs_f64();
        tracing::info!("phase {} done in {:.2}s", name, elapsed);
        self.timings.insert(name.to_string(), elapsed);
        out
    }
}

impl Orchestrator {
    pub fn new(config: Config, deps: PipelineDeps, cancel: CancellationToken) -> Self {
        Self {
            config,
            deps,
            cancel,
        }
    }

    /// Run the full pipeline for one universe and date.
    ///
    /// Per-ticker problems end up in `state.warnings`; the returned error is
    /// reserved for the fatal classes (config, reporter, state write). A
    /// cancelled run is not an error: the state carries `cancelled = true`.
    pub async fn run(&self, universe: &Universe, date: NaiveDate) -> ScreenResult<PipelineState> {
        if universe.is_empty() {
            return Err(ScreenError::ConfigInvalid(format!(
                "universe {} has no tickers",
                universe.name
            )));
        }

        let started_at = Utc::now();
        let wall = Instant::now();
        let mut clock = PhaseClock::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        let cache = Arc::new(DiskCache::new(
            &self.config.cache.dir,
            self.config.cache.ttl_info_min,
            self.config.cache.ttl_candles_min,
        )?);
        let quotes = Arc::new(QuoteClient::new(
            Arc::clone(&self.deps.provider),
            &self.config.quote,
        ));
        let store = Arc::new(ModelStore::new(
            &self.deps.model_dir,
            self.deps.model_loader.clone(),
        ));

        // Phase 1: market context. Failure inside degrades to neutral.
        let monitor = MarketMonitor::new(Arc::clone(&quotes));
        let sentiment = if self.cancel.is_cancelled() {
            MarketSentiment::neutral()
        } else {
            let outcome = clock.run("market_monitor", monitor.snapshot(universe)).await;
            warnings.extend(outcome.warnings);
            outcome.sentiment
        };

        // Phase 2: scan fan-out.
        let scanner = Scanner::new(
            Arc::clone(&quotes),
            Arc::clone(&cache),
            self.config.scanner.workers,
            resolve_gates(&self.config.scanner, universe),
        );
        let scan = clock
            .run("scan", scanner.scan(universe, &self.cancel))
            .await;
        warnings.extend(scan.warnings);
        let scanned = scan.scanned;
        tracing::info!("scanned {}/{} tickers", scanned.len(), universe.ticker_count());

        if self.cancel.is_cancelled() {
            return self.finalize(
                universe, date, started_at, wall, clock, warnings, errors, true, sentiment,
                Regime::neutral(), Vec::new(), scanned.len(), 0,
            );
        }

        // Phase 2.5: regime + event risk. Total failure degrades to neutral.
        let regime = clock.run("regime", self.classify_regime(&quotes, universe)).await;
        let regime = match regime {
            Ok(regime) => regime,
            Err(e) => {
                warnings.push(format!("regime classification failed: {}; using neutral", e));
                Regime::neutral()
            }
        };

        let guard = EventRiskGuard::new(self.deps.calendar.clone());
        let tickers: Vec<String> = scanned.iter().map(|s| s.info.ticker.clone()).collect();
        let event_risks = clock
            .run("event_risk", async { guard.assess(&tickers, &regime, date) })
            .await;

        // Phase 3: predictions. Skipped outright when nothing scanned.
        let predictions = if scanned.is_empty() {
            tracing::warn!("no tickers survived scanning; skipping prediction");
            Vec::new()
        } else {
            let predictor = BatchPredictor::new(
                Arc::clone(&store),
                self.deps.analyzer.clone(),
                self.config.predictor.weights,
                self.config.predictor.workers,
            );
            let outcome = clock
                .run(
                    "predict",
                    predictor.predict_all(&scanned, &sentiment, &regime, &self.cancel),
                )
                .await;
            warnings.extend(outcome.warnings);
            outcome.predictions
        };
        let predicted_count = predictions.len();

        // Phase 4: scoring (pure).
        let badges: HashMap<String, ModelBadge> = scanned
            .iter()
            .map(|s| (s.info.ticker.clone(), store.badge(&s.info.ticker, date)))
            .collect();
        let gates = resolve_gates(&self.config.scanner, universe);
        let scored = clock
            .run("score", async {
                opportunity_scorer::score(ScoreInputs {
                    predictions: &predictions,
                    scanned: &scanned,
                    sentiment: &sentiment,
                    regime: &regime,
                    event_risks: &event_risks,
                    badges: &badges,
                    gates: &gates,
                    config: &self.config.scorer,
                })
            })
            .await;

        // Phase 4.5: best-effort training.
        let training_warnings = clock
            .run("train", self.train_stale_models(&scored, &store, date))
            .await;
        warnings.extend(training_warnings);

        if self.cancel.is_cancelled() {
            return self.finalize(
                universe, date, started_at, wall, clock, warnings, errors, true, sentiment,
                regime, scored, scanned.len(), predicted_count,
            );
        }

        // Phases 5 and 6: report + state, both fatal on failure. The state
        // file is written even when the reporter fails, so operators can see
        // which phase died.
        let reporter = Reporter::new(&self.config.report.dir);
        let report_result = clock
            .run("report", async {
                reporter.emit(&ReportContext {
                    date,
                    universe_name: &universe.name,
                    duration_sec: wall.elapsed().as_secs_f64(),
                    scanned_count: scanned.len(),
                    predicted_count,
                    scored: &scored,
                    sentiment: &sentiment,
                    regime: &regime,
                    event_risks: &event_risks,
                    errors: &errors,
                    warnings: &warnings,
                })
            })
            .await;

        let (report_paths, report_error) = match report_result {
            Ok((html, csv)) => (
                ReportPaths {
                    html: Some(html),
                    csv: Some(csv),
                },
                None,
            ),
            Err(e) => {
                errors.push(format!("report phase failed: {}", e));
                (ReportPaths::default(), Some(e))
            }
        };

        let mut state = self.build_state(
            universe, date, started_at, wall, &clock, warnings, errors, false, sentiment,
            regime, scored, scanned.len(), predicted_count,
        );
        state.report_paths = report_paths;

        let state_clock_started = Instant::now();
        state::write(&self.config.report.dir, &state)?;
        tracing::debug!(
            "state written in {:.2}s",
            state_clock_started.elapsed().as_secs_f64()
        );

        if let Ok(stats) = cache.stats() {
            tracing::debug!(
                "cache: {} files, {} bytes in {}",
                stats.file_count,
                stats.total_bytes,
                stats.dir.display()
            );
        }

        match report_error {
            Some(e) => Err(e),
            None => Ok(state),
        }
    }

    async fn classify_regime(
        &self,
        quotes: &QuoteClient,
        universe: &Universe,
    ) -> ScreenResult<Regime> {
        let series = quotes
            .fetch_candles(
                &universe.index_symbol,
                HistoryPeriod::OneYear,
                CandleInterval::Daily,
            )
            .await
            .map_err(|e| ScreenError::RegimeFitFailed(e.to_string()))?;
        let closes: Vec<f64> = series.iter().map(|c| c.close).collect();
        RegimeEngine::new().classify(&closes)
    }

    /// Build and run the retraining queue. Disabled training still logs the
    /// skip so the nightly log shows the phase was considered.
    async fn train_stale_models(
        &self,
        scored: &[ScoredStock],
        store: &ModelStore,
        date: NaiveDate,
    ) -> Vec<String> {
        if !self.config.training.enabled {
            tracing::info!("training disabled; phase skipped");
            return Vec::new();
        }

        let queue = training::build_queue(scored, store, date, &self.config.training);
        if queue.is_empty() {
            tracing::info!("no stale models to retrain");
            return Vec::new();
        }

        match &self.deps.trainer {
            Some(trainer) => {
                tracing::info!("retraining {} stale models", queue.len());
                training::run_queue(&queue, trainer.as_ref()).await
            }
            None => {
                tracing::info!(
                    "{} stale models queued but no trainer is wired; skipping",
                    queue.len()
                );
                Vec::new()
            }
        }
    }

    /// Cancelled-path exit: write whatever state exists and stop.
    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        universe: &Universe,
        date: NaiveDate,
        started_at: chrono::DateTime<Utc>,
        wall: Instant,
        clock: PhaseClock,
        warnings: Vec<String>,
        errors: Vec<String>,
        cancelled: bool,
        sentiment: MarketSentiment,
        regime: Regime,
        scored: Vec<ScoredStock>,
        scanned_count: usize,
        predicted_count: usize,
    ) -> ScreenResult<PipelineState> {
        let state = self.build_state(
            universe, date, started_at, wall, &clock, warnings, errors, cancelled, sentiment,
            regime, scored, scanned_count, predicted_count,
        );
        state::write(&self.config.report.dir, &state)?;
        Ok(state)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_state(
        &self,
        universe: &Universe,
        date: NaiveDate,
        started_at: chrono::DateTime<Utc>,
        wall: Instant,
        clock: &PhaseClock,
        warnings: Vec<String>,
        errors: Vec<String>,
        cancelled: bool,
        sentiment: MarketSentiment,
        regime: Regime,
        scored: Vec<ScoredStock>,
        scanned_count: usize,
        predicted_count: usize,
    ) -> PipelineState {
        PipelineState {
            date,
            started_at,
            finished_at: Utc::now(),
            duration_sec: wall.elapsed().as_secs_f64(),
            phase_timings: clock.timings.clone(),
            universe_name: universe.name.clone(),
            scanned_count,
            predicted_count,
            top_opportunities: scored.into_iter().take(TOP_OPPORTUNITIES).collect(),
            market_sentiment: sentiment,
            regime,
            errors,
            warnings,
            cancelled,
            report_paths: ReportPaths::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use screener_core::{Candle, QuoteInfo, ScreenResult, Sector, Signal};

    const BANKS: [&str; 5] = ["CBA.AX", "WBC.AX", "ANZ.AX", "NAB.AX", "MQG.AX"];

    fn candles(n: usize, base: f64, drift: f64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close =
                    base * (1.0 + drift).powi(i as i32) * (1.0 + 0.002 * ((i % 3) as f64 - 1.0));
                Candle {
                    ts: start + chrono::Duration::days(i as i64),
                    open: close * 0.999,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume: 900_000.0,
                }
            })
            .collect()
    }

    struct FixtureProvider {
        rate_limited: Vec<String>,
    }

    #[async_trait]
    impl QuoteProvider for FixtureProvider {
        async fn fetch_history(
            &self,
            ticker: &str,
            period: HistoryPeriod,
            _interval: CandleInterval,
        ) -> ScreenResult<Vec<Candle>> {
            if self.rate_limited.iter().any(|t| t == ticker) {
                return Err(ScreenError::RateLimited("HTTP 429".to_string()));
            }
            let n = match period {
                HistoryPeriod::OneYear => 260,
                _ => 60,
            };
            match ticker {
                "^AXJO" => Ok(candles(n, 7500.0, 0.0004)),
                "^AXVI" => Ok(candles(n, 12.0, 0.0)),
                "^GSPC" => Ok(candles(n, 5400.0, 0.0004)),
                t if BANKS.contains(&t) => Ok(candles(60, 50.0, 0.001)),
                _ => Err(ScreenError::NotFound(ticker.to_string())),
            }
        }

        async fn fetch_info(&self, _ticker: &str) -> ScreenResult<QuoteInfo> {
            Ok(QuoteInfo {
                market_cap: Some(5.0e10),
                avg_volume: Some(2.0e6),
                price: None,
                beta: Some(0.9),
            })
        }
    }

    fn bank_universe() -> Universe {
        let mut universe = Universe::builtin_au();
        universe.sectors = vec![Sector {
            name: "Financials".to_string(),
            weight: 1.3,
            tickers: BANKS.iter().map(|t| t.to_string()).collect(),
        }];
        universe
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.quote.base_delay_sec = 0.0;
        config.quote.max_retries = 0;
        config.quote.retry_backoff_sec = 0.0;
        config.cache.dir = dir.join("cache");
        config.report.dir = dir.join("reports");
        config
    }

    fn orchestrator(
        dir: &std::path::Path,
        rate_limited: Vec<String>,
        cancel: CancellationToken,
    ) -> Orchestrator {
        Orchestrator::new(
            test_config(dir),
            PipelineDeps {
                provider: Arc::new(FixtureProvider { rate_limited }),
                model_loader: None,
                analyzer: None,
                trainer: None,
                calendar: EventCalendar::empty(),
                model_dir: dir.join("models"),
            },
            cancel,
        )
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 10).unwrap()
    }

    #[tokio::test]
    async fn happy_path_produces_full_state_and_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(tmp.path(), vec![], CancellationToken::new());

        let state = orchestrator.run(&bank_universe(), run_date()).await.unwrap();

        assert_eq!(state.scanned_count, 5);
        assert_eq!(state.predicted_count, 5);
        assert_eq!(state.top_opportunities.len(), 5);
        assert!(!state.cancelled);
        assert!(state.errors.is_empty());

        // Phases ran in order and their sum fits inside the run duration.
        for phase in ["market_monitor", "scan", "regime", "predict", "score", "report"] {
            assert!(state.phase_timings.contains_key(phase), "{}", phase);
        }
        let total: f64 = state.phase_timings.values().sum();
        assert!(total <= state.duration_sec + 1e-6);

        // Ordering invariant on the published list.
        for pair in state.top_opportunities.windows(2) {
            assert!(pair[0].opportunity_score >= pair[1].opportunity_score);
        }

        // Artifacts exist where the state says they are.
        assert!(state.report_paths.html.as_ref().unwrap().exists());
        assert!(state.report_paths.csv.as_ref().unwrap().exists());
        let state_path = tmp
            .path()
            .join("reports/state/2025-07-10_pipeline_state.json");
        assert!(state_path.exists());

        // State file round-trips.
        let raw = std::fs::read_to_string(state_path).unwrap();
        let back: PipelineState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.scanned_count, 5);
        assert_eq!(back.universe_name, "au");
    }

    #[tokio::test]
    async fn rate_limited_ticker_becomes_a_warning_not_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(
            tmp.path(),
            vec!["NAB.AX".to_string()],
            CancellationToken::new(),
        );

        let state = orchestrator.run(&bank_universe(), run_date()).await.unwrap();

        assert_eq!(state.scanned_count, 4);
        assert_eq!(state.predicted_count, 4);
        assert!(!state.top_opportunities.iter().any(|s| s.ticker == "NAB.AX"));
        assert_eq!(
            state
                .warnings
                .iter()
                .filter(|w| w.contains("NAB.AX") && w.contains("rate limited"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn no_models_means_every_signal_holds() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(tmp.path(), vec![], CancellationToken::new());

        let state = orchestrator.run(&bank_universe(), run_date()).await.unwrap();
        for stock in &state.top_opportunities {
            assert_eq!(stock.prediction.signal, Signal::Hold);
            assert!(!stock.prediction.components.model.available);
            assert!((0.0..=100.0).contains(&stock.opportunity_score));
        }
    }

    #[tokio::test]
    async fn all_tickers_dropped_still_reports_and_writes_state() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(
            tmp.path(),
            BANKS.iter().map(|t| t.to_string()).collect(),
            CancellationToken::new(),
        );

        let state = orchestrator.run(&bank_universe(), run_date()).await.unwrap();

        assert_eq!(state.scanned_count, 0);
        assert_eq!(state.predicted_count, 0);
        assert!(state.top_opportunities.is_empty());
        assert_eq!(state.warnings.len(), 5);
        // Prediction was skipped; reporting still happened.
        assert!(!state.phase_timings.contains_key("predict"));
        assert!(state.phase_timings.contains_key("report"));
        let html = std::fs::read_to_string(state.report_paths.html.unwrap()).unwrap();
        assert!(html.contains("No opportunities"));
    }

    #[tokio::test]
    async fn empty_universe_is_config_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(tmp.path(), vec![], CancellationToken::new());

        let mut universe = bank_universe();
        universe.sectors.clear();

        let err = orchestrator.run(&universe, run_date()).await.unwrap_err();
        assert!(matches!(err, ScreenError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn cancelled_before_scan_writes_partial_state() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator = orchestrator(tmp.path(), vec![], cancel);

        let state = orchestrator.run(&bank_universe(), run_date()).await.unwrap();

        assert!(state.cancelled);
        assert_eq!(state.scanned_count, 0);
        assert!(state.phase_timings.contains_key("scan"));
        assert!(!state.phase_timings.contains_key("predict"));
        assert!(!state.phase_timings.contains_key("report"));

        // The partial state still landed on disk.
        assert!(tmp
            .path()
            .join("reports/state/2025-07-10_pipeline_state.json")
            .exists());
    }

    #[tokio::test]
    async fn rerun_with_warm_cache_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(tmp.path(), vec![], CancellationToken::new());

        let first = orchestrator.run(&bank_universe(), run_date()).await.unwrap();
        let second = orchestrator.run(&bank_universe(), run_date()).await.unwrap();

        let ordering = |state: &PipelineState| {
            state
                .top_opportunities
                .iter()
                .map(|s| (s.ticker.clone(), format!("{:.6}", s.opportunity_score)))
                .collect::<Vec<_>>()
        };
        assert_eq!(ordering(&first), ordering(&second));
    }
}
