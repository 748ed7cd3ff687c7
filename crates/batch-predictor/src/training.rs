//! Stale-model detection and the bounded retraining queue.
//!
//! The queue is built from the scored list so the most promising tickers
//! retrain first; execution is delegated to the external trainer one ticker
//! at a time, and a trainer failure only produces a warning.

use crate::model_store::ModelStore;
use chrono::NaiveDate;
use screener_core::{ModelTrainer, ScoredStock, TrainingConfig};

/// Tickers whose artifact is absent or older than the staleness threshold,
/// ordered by opportunity score descending, capped at the nightly budget.
pub fn build_queue(
    scored: &[ScoredStock],
    store: &ModelStore,
    run_date: NaiveDate,
    config: &TrainingConfig,
) -> Vec<String> {
    // `scored` is already ordered by opportunity score descending.
    let mut queue: Vec<String> = scored
        .iter()
        .filter(|s| store.is_stale(&s.ticker, run_date, config.stale_threshold_days))
        .map(|s| s.ticker.clone())
        .collect();
    queue.truncate(config.max_models_per_night);
    queue
}

/// Run the queue through the external trainer, one ticker at a time.
/// Returns warnings for failed tickers; never fails the pipeline.
pub async fn run_queue(queue: &[String], trainer: &dyn ModelTrainer) -> Vec<String> {
    let mut warnings = Vec::new();
    for ticker in queue {
        match trainer.train(ticker).await {
            Ok(()) => tracing::info!("retrained {}", ticker),
            Err(e) => {
                tracing::warn!("training {} failed: {}", ticker, e);
                warnings.push(format!("training {} failed: {}", ticker, e));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use screener_core::{Band, Prediction, ScreenError, ScreenResult};
    use std::sync::Mutex;

    fn scored(ticker: &str, score: f64) -> ScoredStock {
        ScoredStock {
            ticker: ticker.to_string(),
            sector: "Financials".to_string(),
            price: Some(100.0),
            screening_score: 60.0,
            prediction: Prediction::hold(ticker),
            opportunity_score: score,
            opportunity_band: Band::from_score(score),
        }
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 10).unwrap()
    }

    fn fresh_meta(dir: &std::path::Path, ticker: &str) {
        std::fs::write(dir.join(format!("{}.artifact", ticker)), b"m").unwrap();
        std::fs::write(
            dir.join(format!("{}.meta.json", ticker)),
            r#"{"trained_at": "2025-07-09T02:00:00Z"}"#,
        )
        .unwrap();
    }

    #[test]
    fn queue_selects_stale_in_score_order() {
        let tmp = tempfile::tempdir().unwrap();
        fresh_meta(tmp.path(), "WBC.AX");
        let store = ModelStore::new(tmp.path(), None);

        let scored = vec![
            scored("CBA.AX", 82.0),
            scored("WBC.AX", 75.0), // fresh artifact, skipped
            scored("ANZ.AX", 70.0),
        ];

        let queue = build_queue(&scored, &store, run_date(), &TrainingConfig::default());
        assert_eq!(queue, vec!["CBA.AX", "ANZ.AX"]);
    }

    #[test]
    fn queue_respects_nightly_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ModelStore::new(tmp.path(), None);
        let scored: Vec<ScoredStock> = (0..10)
            .map(|i| scored(&format!("T{}.AX", i), 90.0 - i as f64))
            .collect();

        let config = TrainingConfig {
            max_models_per_night: 3,
            ..TrainingConfig::default()
        };
        let queue = build_queue(&scored, &store, run_date(), &config);
        assert_eq!(queue, vec!["T0.AX", "T1.AX", "T2.AX"]);
    }

    struct RecordingTrainer {
        trained: Mutex<Vec<String>>,
        fail: Vec<String>,
    }

    #[async_trait]
    impl ModelTrainer for RecordingTrainer {
        async fn train(&self, ticker: &str) -> ScreenResult<()> {
            if self.fail.iter().any(|t| t == ticker) {
                return Err(ScreenError::Transport("gpu went away".to_string()));
            }
            self.trained.lock().unwrap().push(ticker.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn trainer_failures_are_isolated() {
        let trainer = RecordingTrainer {
            trained: Mutex::new(Vec::new()),
            fail: vec!["WBC.AX".to_string()],
        };
        let queue = vec![
            "CBA.AX".to_string(),
            "WBC.AX".to_string(),
            "ANZ.AX".to_string(),
        ];

        let warnings = run_queue(&queue, &trainer).await;

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("WBC.AX"));
        assert_eq!(*trainer.trained.lock().unwrap(), vec!["CBA.AX", "ANZ.AX"]);
    }
}
