//! Pipeline state persistence: one JSON file per run date under
//! `<report dir>/state/`. The schema is stable; new fields may only be
//! added. Write failure is fatal to the run.

use screener_core::{PipelineState, ScreenError, ScreenResult};
use std::path::{Path, PathBuf};

pub fn state_path(report_dir: &Path, state: &PipelineState) -> PathBuf {
    report_dir
        .join("state")
        .join(format!("{}_pipeline_state.json", state.date))
}

pub fn write(report_dir: &Path, state: &PipelineState) -> ScreenResult<PathBuf> {
    let path = state_path(report_dir, state);
    let parent = path.parent().expect("state path always has a parent");
    std::fs::create_dir_all(parent)
        .map_err(|e| ScreenError::StateWriteFailed(format!("{}: {}", parent.display(), e)))?;

    let json = serde_json::to_vec_pretty(state)
        .map_err(|e| ScreenError::StateWriteFailed(e.to_string()))?;
    std::fs::write(&path, json)
        .map_err(|e| ScreenError::StateWriteFailed(format!("{}: {}", path.display(), e)))?;

    tracing::info!("state written: {}", path.display());
    Ok(path)
}

pub fn read(path: &Path) -> ScreenResult<PipelineState> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use screener_core::{MarketSentiment, Regime, ReportPaths};
    use std::collections::BTreeMap;

    fn state() -> PipelineState {
        PipelineState {
            date: NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_sec: 33.0,
            phase_timings: BTreeMap::from([
                ("scan".to_string(), 20.0),
                ("predict".to_string(), 8.0),
            ]),
            universe_name: "au".to_string(),
            scanned_count: 200,
            predicted_count: 198,
            top_opportunities: vec![],
            market_sentiment: MarketSentiment::neutral(),
            regime: Regime::neutral(),
            errors: vec![],
            warnings: vec!["NAB.AX: rate limited".to_string()],
            cancelled: false,
            report_paths: ReportPaths::default(),
        }
    }

    #[test]
    fn write_then_read_preserves_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), &state()).unwrap();
        assert!(path.ends_with("state/2025-07-10_pipeline_state.json"));

        let back = read(&path).unwrap();
        assert_eq!(back.scanned_count, 200);
        assert_eq!(back.predicted_count, 198);
        assert_eq!(back.phase_timings, state().phase_timings);
        assert_eq!(back.warnings, state().warnings);
        assert!(!back.cancelled);
    }

    #[test]
    fn unwritable_dir_is_state_write_failed() {
        let tmp = tempfile::tempdir().unwrap();
        // A file where the state directory should be.
        std::fs::write(tmp.path().join("state"), b"blocking file").unwrap();

        let err = write(tmp.path(), &state()).unwrap_err();
        assert!(matches!(err, ScreenError::StateWriteFailed(_)));
    }
}
