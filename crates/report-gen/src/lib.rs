//! Morning report rendering: a self-contained HTML page for humans and a CSV
//! export for downstream consumers. The reporter never fetches data; it only
//! formats what the pipeline hands it. Render or write failures are fatal to
//! the run.

mod html;

use chrono::NaiveDate;
use screener_core::{
    EventRiskBatch, MarketSentiment, Regime, ScoredStock, ScreenError, ScreenResult,
};
use std::path::{Path, PathBuf};

/// Rows shown in the top-opportunities table.
pub const TOP_N: usize = 20;

pub struct ReportContext<'a> {
    pub date: NaiveDate,
    pub universe_name: &'a str,
    pub duration_sec: f64,
    pub scanned_count: usize,
    pub predicted_count: usize,
    pub scored: &'a [ScoredStock],
    pub sentiment: &'a MarketSentiment,
    pub regime: &'a Regime,
    pub event_risks: &'a EventRiskBatch,
    pub errors: &'a [String],
    pub warnings: &'a [String],
}

/// Per-sector summary used by the HTML breakdown table.
pub struct SectorSummary {
    pub name: String,
    pub count: usize,
    pub median_score: f64,
}

pub fn sector_breakdown(scored: &[ScoredStock]) -> Vec<SectorSummary> {
    let mut by_sector: Vec<(String, Vec<f64>)> = Vec::new();
    for stock in scored {
        match by_sector.iter_mut().find(|(name, _)| *name == stock.sector) {
            Some((_, scores)) => scores.push(stock.opportunity_score),
            None => by_sector.push((stock.sector.clone(), vec![stock.opportunity_score])),
        }
    }
    by_sector.sort_by(|a, b| a.0.cmp(&b.0));
    by_sector
        .into_iter()
        .map(|(name, scores)| SectorSummary {
            count: scores.len(),
            median_score: technical_indicators::median(&scores).unwrap_or(0.0),
            name,
        })
        .collect()
}

pub struct Reporter {
    dir: PathBuf,
}

impl Reporter {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Write both report artifacts for a run. Returns (html, csv) paths.
    pub fn emit(&self, ctx: &ReportContext<'_>) -> ScreenResult<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ScreenError::ReporterFailed(e.to_string()))?;

        let html_path = self.dir.join(format!("{}_report.html", ctx.date));
        let csv_path = self.dir.join(format!("{}_export.csv", ctx.date));

        std::fs::write(&html_path, html::render(ctx))
            .map_err(|e| ScreenError::ReporterFailed(format!("html: {}", e)))?;

        write_csv(&csv_path, ctx)?;

        tracing::info!(
            "report written: {} ({} rows)",
            html_path.display(),
            ctx.scored.len()
        );
        Ok((html_path, csv_path))
    }
}

fn write_csv(path: &Path, ctx: &ReportContext<'_>) -> ScreenResult<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| ScreenError::ReporterFailed(format!("csv: {}", e)))?;

    writer
        .write_record([
            "ticker",
            "sector",
            "price",
            "screening_score",
            "ensemble_confidence",
            "signal",
            "opportunity_score",
            "band",
            "earnings_in_days",
            "dividend_in_days",
            "regulatory_flag",
            "risk_score",
            "sit_out",
        ])
        .map_err(|e| ScreenError::ReporterFailed(format!("csv: {}", e)))?;

    for stock in ctx.scored {
        let risk = ctx.event_risks.get(&stock.ticker);
        let record = [
            stock.ticker.clone(),
            stock.sector.clone(),
            stock.price.map(|p| format!("{:.4}", p)).unwrap_or_default(),
            format!("{:.2}", stock.screening_score),
            format!("{:.4}", stock.prediction.ensemble_confidence),
            stock.prediction.signal.label().to_string(),
            format!("{:.2}", stock.opportunity_score),
            stock.opportunity_band.label().to_string(),
            risk
                .and_then(|r| r.earnings_in_days)
                .map(|d| d.to_string())
                .unwrap_or_default(),
            risk
                .and_then(|r| r.dividend_in_days)
                .map(|d| d.to_string())
                .unwrap_or_default(),
            risk.map(|r| r.regulatory_flag.to_string()).unwrap_or_default(),
            risk.map(|r| format!("{:.4}", r.risk_score)).unwrap_or_default(),
            risk.map(|r| r.sit_out.to_string()).unwrap_or_default(),
        ];
        writer
            .write_record(&record)
            .map_err(|e| ScreenError::ReporterFailed(format!("csv: {}", e)))?;
    }

    writer
        .flush()
        .map_err(|e| ScreenError::ReporterFailed(format!("csv: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use screener_core::{
        Band, Component, EventRisk, Prediction, PredictionComponents, Signal,
    };
    use std::collections::HashMap;

    fn scored(ticker: &str, sector: &str, score: f64) -> ScoredStock {
        ScoredStock {
            ticker: ticker.to_string(),
            sector: sector.to_string(),
            price: Some(104.55),
            screening_score: 64.0,
            prediction: Prediction {
                ticker: ticker.to_string(),
                components: PredictionComponents {
                    model: Component::unavailable(),
                    trend: Component::new(1.0, 0.6),
                    technical: Component::new(0.0, 0.2),
                    sentiment: Component::new(0.0, 0.5),
                },
                signal: Signal::Hold,
                ensemble_direction: 0.45,
                ensemble_confidence: 0.48,
            },
            opportunity_score: score,
            opportunity_band: Band::from_score(score),
        }
    }

    fn risks_for(ticker: &str) -> EventRiskBatch {
        EventRiskBatch {
            per_ticker: HashMap::from([(
                ticker.to_string(),
                EventRisk {
                    earnings_in_days: Some(2),
                    dividend_in_days: None,
                    regulatory_flag: false,
                    risk_score: 0.1,
                    sit_out: false,
                },
            )]),
            market_regime: Regime::neutral(),
        }
    }

    fn context<'a>(
        scored: &'a [ScoredStock],
        sentiment: &'a MarketSentiment,
        regime: &'a Regime,
        risks: &'a EventRiskBatch,
    ) -> ReportContext<'a> {
        ReportContext {
            date: NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(),
            universe_name: "au",
            duration_sec: 42.5,
            scanned_count: scored.len(),
            predicted_count: scored.len(),
            scored,
            sentiment,
            regime,
            event_risks: risks,
            errors: &[],
            warnings: &[],
        }
    }

    #[test]
    fn emits_both_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let stocks = vec![
            scored("CBA.AX", "Financials", 81.0),
            scored("BHP.AX", "Materials", 66.0),
        ];
        let sentiment = MarketSentiment::neutral();
        let regime = Regime::neutral();
        let risks = risks_for("CBA.AX");

        let reporter = Reporter::new(tmp.path());
        let (html_path, csv_path) = reporter
            .emit(&context(&stocks, &sentiment, &regime, &risks))
            .unwrap();

        assert!(html_path.exists());
        assert!(csv_path.exists());
        assert_eq!(html_path.file_name().unwrap(), "2025-07-10_report.html");
        assert_eq!(csv_path.file_name().unwrap(), "2025-07-10_export.csv");

        let html = std::fs::read_to_string(&html_path).unwrap();
        assert!(html.contains("CBA.AX"));
        assert!(html.contains("Market Context"));
        assert!(html.contains("Sector Breakdown"));
        assert!(html.contains("HOLD"));
    }

    #[test]
    fn csv_round_trips_the_columns() {
        let tmp = tempfile::tempdir().unwrap();
        let stocks = vec![scored("CBA.AX", "Financials", 81.0)];
        let sentiment = MarketSentiment::neutral();
        let regime = Regime::neutral();
        let risks = risks_for("CBA.AX");

        let reporter = Reporter::new(tmp.path());
        let (_, csv_path) = reporter
            .emit(&context(&stocks, &sentiment, &regime, &risks))
            .unwrap();

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 13);
        assert_eq!(&headers[0], "ticker");
        assert_eq!(&headers[8], "earnings_in_days");
        assert_eq!(&headers[12], "sit_out");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "CBA.AX");
        assert_eq!(&rows[0][5], "HOLD");
        assert_eq!(&rows[0][7], "HIGH");
        assert_eq!(&rows[0][8], "2");
        assert_eq!(&rows[0][9], ""); // no dividend scheduled
        assert_eq!(&rows[0][12], "false");
    }

    #[test]
    fn empty_run_still_renders() {
        let tmp = tempfile::tempdir().unwrap();
        let stocks: Vec<ScoredStock> = vec![];
        let sentiment = MarketSentiment::neutral();
        let regime = Regime::neutral();
        let risks = EventRiskBatch {
            per_ticker: HashMap::new(),
            market_regime: Regime::neutral(),
        };

        let reporter = Reporter::new(tmp.path());
        let (html_path, csv_path) = reporter
            .emit(&context(&stocks, &sentiment, &regime, &risks))
            .unwrap();

        let html = std::fs::read_to_string(&html_path).unwrap();
        assert!(html.contains("No opportunities"));

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(reader.records().count(), 0);
    }

    #[test]
    fn sector_breakdown_medians() {
        let stocks = vec![
            scored("CBA.AX", "Financials", 80.0),
            scored("WBC.AX", "Financials", 60.0),
            scored("BHP.AX", "Materials", 70.0),
        ];
        let breakdown = sector_breakdown(&stocks);
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].name, "Financials");
        assert_eq!(breakdown[0].count, 2);
        assert!((breakdown[0].median_score - 70.0).abs() < 1e-9);
        assert_eq!(breakdown[1].name, "Materials");
    }
}
