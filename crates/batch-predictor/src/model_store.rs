//! On-disk model artifact store. Artifacts are opaque; the store only knows
//! the layout (`<ticker>.artifact` + `<ticker>.meta.json`) and delegates
//! deserialization to a pluggable loader.

use chrono::NaiveDate;
use screener_core::{DirectionModel, ModelBadge, ModelLoader, ModelMeta, ScreenError, ScreenResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ModelStore {
    dir: PathBuf,
    loader: Option<Arc<dyn ModelLoader>>,
}

impl ModelStore {
    pub fn new(dir: &Path, loader: Option<Arc<dyn ModelLoader>>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            loader,
        }
    }

    pub fn artifact_path(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.artifact", ticker))
    }

    fn meta_path(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", ticker))
    }

    pub fn has_artifact(&self, ticker: &str) -> bool {
        self.artifact_path(ticker).is_file()
    }

    /// Sidecar metadata; an unreadable or unparseable sidecar counts as absent.
    pub fn meta(&self, ticker: &str) -> Option<ModelMeta> {
        let raw = std::fs::read_to_string(self.meta_path(ticker)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::debug!("{}: unparseable model meta: {}", ticker, e);
                None
            }
        }
    }

    /// Load the direction model for a ticker. Absent artifact or missing
    /// loader makes the model component unavailable upstream.
    pub fn load(&self, ticker: &str) -> ScreenResult<Box<dyn DirectionModel>> {
        let path = self.artifact_path(ticker);
        if !path.is_file() {
            return Err(ScreenError::ArtifactMissing(ticker.to_string()));
        }
        let loader = self.loader.as_ref().ok_or_else(|| {
            ScreenError::ArtifactMissing(format!("{}: no model loader configured", ticker))
        })?;
        loader.load(&path)
    }

    /// Age of the artifact in days relative to the run date. Prefers the
    /// sidecar's `trained_at`; falls back to the artifact file mtime.
    pub fn artifact_age_days(&self, ticker: &str, run_date: NaiveDate) -> Option<i64> {
        if let Some(meta) = self.meta(ticker) {
            return Some((run_date - meta.trained_at.date_naive()).num_days());
        }
        let modified = std::fs::metadata(self.artifact_path(ticker))
            .and_then(|m| m.modified())
            .ok()?;
        let modified: chrono::DateTime<chrono::Utc> = modified.into();
        Some((run_date - modified.date_naive()).num_days())
    }

    /// Scorer-facing facts, resolved against the run date.
    pub fn badge(&self, ticker: &str, run_date: NaiveDate) -> ModelBadge {
        if !self.has_artifact(ticker) {
            return ModelBadge::default();
        }
        ModelBadge {
            artifact_age_days: self.artifact_age_days(ticker, run_date),
            hit_rate: self.meta(ticker).and_then(|m| m.hit_rate),
        }
    }

    /// A model is stale when the artifact is absent or older than the
    /// threshold. Unknowable age counts as stale.
    pub fn is_stale(&self, ticker: &str, run_date: NaiveDate, threshold_days: i64) -> bool {
        if !self.has_artifact(ticker) {
            return true;
        }
        match self.artifact_age_days(ticker, run_date) {
            Some(age) => age > threshold_days,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn write_meta(dir: &Path, ticker: &str, trained_at: &str, hit_rate: Option<f64>) {
        let hit = hit_rate
            .map(|h| format!(", \"hit_rate\": {}", h))
            .unwrap_or_default();
        std::fs::write(
            dir.join(format!("{}.meta.json", ticker)),
            format!(r#"{{"trained_at": "{}"{}, "version": "3"}}"#, trained_at, hit),
        )
        .unwrap();
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 10).unwrap()
    }

    #[test]
    fn absent_artifact_is_stale_and_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ModelStore::new(tmp.path(), None);

        assert!(store.is_stale("CBA.AX", run_date(), 7));
        assert!(matches!(
            store.load("CBA.AX").unwrap_err(),
            ScreenError::ArtifactMissing(_)
        ));
        assert!(store.badge("CBA.AX", run_date()).artifact_age_days.is_none());
    }

    #[test]
    fn meta_drives_age_and_staleness() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("CBA.AX.artifact"), b"opaque").unwrap();
        write_meta(tmp.path(), "CBA.AX", "2025-07-01T02:00:00Z", Some(0.63));

        let store = ModelStore::new(tmp.path(), None);
        assert_eq!(store.artifact_age_days("CBA.AX", run_date()), Some(9));
        assert!(store.is_stale("CBA.AX", run_date(), 7));
        assert!(!store.is_stale("CBA.AX", run_date(), 14));

        let badge = store.badge("CBA.AX", run_date());
        assert_eq!(badge.artifact_age_days, Some(9));
        assert_eq!(badge.hit_rate, Some(0.63));
    }

    #[test]
    fn unparseable_meta_counts_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("CBA.AX.artifact"), b"opaque").unwrap();
        std::fs::write(tmp.path().join("CBA.AX.meta.json"), b"{broken").unwrap();

        let store = ModelStore::new(tmp.path(), None);
        assert!(store.meta("CBA.AX").is_none());
        // Falls back to the artifact mtime, which is "now": fresh.
        assert!(!store.is_stale("CBA.AX", Utc::now().date_naive(), 7));
    }

    #[test]
    fn meta_round_trips_via_serde() {
        let meta = ModelMeta {
            trained_at: Utc.with_ymd_and_hms(2025, 7, 8, 3, 30, 0).unwrap(),
            hit_rate: Some(0.61),
            version: Some("3".to_string()),
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: ModelMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trained_at, meta.trained_at);
        assert_eq!(back.hit_rate, Some(0.61));
    }
}
