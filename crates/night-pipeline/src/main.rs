//! nightscreen: overnight equity-screening pipeline.
//!
//! Usage:
//!   nightscreen --universe au
//!   nightscreen --universe both --no-train
//!   nightscreen --universe au --test --date 2025-07-10
//!   nightscreen --universe us --sectors Technology,Healthcare
//!
//! Exit codes: 0 success, 1 fatal (config, report/state write, zero
//! results), 2 cancelled by signal.

use batch_predictor::HttpNewsAnalyzer;
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use event_risk::EventCalendar;
use night_pipeline::{Orchestrator, PipelineDeps};
use quote_client::ChartApiProvider;
use screener_core::{Band, Config, NewsAnalyzer, PipelineState, ScreenError, Universe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_QUOTE_API_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum UniverseArg {
    Au,
    Us,
    Both,
}

#[derive(Parser)]
#[command(name = "nightscreen", version, about = "Overnight equity-screening pipeline")]
struct Cli {
    /// Config file (JSON).
    #[arg(long, default_value = "models/config/screening_config.json")]
    config: PathBuf,

    /// Which universe(s) to run.
    #[arg(long, value_enum, default_value_t = UniverseArg::Au)]
    universe: UniverseArg,

    /// Scan only the first 5 tickers of the first sector.
    #[arg(long)]
    test: bool,

    /// Restrict the run to these sector names (comma separated).
    #[arg(long, value_delimiter = ',')]
    sectors: Vec<String>,

    /// Force-skip the training phase.
    #[arg(long)]
    no_train: bool,

    /// Run date (defaults to today in the local timezone).
    #[arg(long)]
    date: Option<NaiveDate>,
}

fn error_kind(e: &ScreenError) -> &'static str {
    match e {
        ScreenError::ConfigInvalid(_) => "ConfigInvalid",
        ScreenError::RateLimited(_) => "RateLimited",
        ScreenError::Transport(_) => "Transport",
        ScreenError::NotFound(_) => "NotFound",
        ScreenError::InsufficientData(_) => "InsufficientData",
        ScreenError::ArtifactMissing(_) => "ArtifactMissing",
        ScreenError::AnalyzerUnavailable(_) => "AnalyzerUnavailable",
        ScreenError::RegimeFitFailed(_) => "RegimeFitFailed",
        ScreenError::CacheCorrupt(_) => "CacheCorrupt",
        ScreenError::ReporterFailed(_) => "ReporterFailed",
        ScreenError::StateWriteFailed(_) => "StateWriteFailed",
        ScreenError::Cancelled => "Cancelled",
        ScreenError::Io(_) => "Io",
        ScreenError::Serialization(_) => "Serialization",
    }
}

fn fatal(e: &ScreenError) -> i32 {
    println!("FATAL: {}: {}", error_kind(e), e);
    1
}

fn print_ok(state: &PipelineState) {
    let high = state
        .top_opportunities
        .iter()
        .filter(|s| s.opportunity_band == Band::High)
        .count();
    let report = state
        .report_paths
        .html
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "OK: scanned={} predicted={} top_band_high={} report={}",
        state.scanned_count, state.predicted_count, high, report
    );
}

fn selected_universes(cli: &Cli) -> Vec<Universe> {
    let mut universes = match cli.universe {
        UniverseArg::Au => vec![Universe::builtin_au()],
        UniverseArg::Us => vec![Universe::builtin_us()],
        UniverseArg::Both => vec![Universe::builtin_au(), Universe::builtin_us()],
    };

    for universe in &mut universes {
        if !cli.sectors.is_empty() {
            universe.restrict_sectors(&cli.sectors);
        }
        if cli.test {
            universe.truncate_for_test();
        }
    }

    universes
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "night_pipeline=info,scan_engine=info,batch_predictor=info,quote_client=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => return fatal(&e),
    };
    if cli.no_train {
        config.training.enabled = false;
    }

    let date = cli.date.unwrap_or_else(|| chrono::Local::now().date_naive());

    let base_url =
        std::env::var("QUOTE_API_URL").unwrap_or_else(|_| DEFAULT_QUOTE_API_URL.to_string());
    let api_key = std::env::var("QUOTE_API_KEY").ok().filter(|k| !k.is_empty());
    let provider = Arc::new(ChartApiProvider::new(base_url, api_key));

    let calendar_path = cli
        .config
        .parent()
        .map(|dir| dir.join("event_calendar.json"))
        .filter(|p| p.is_file());
    let calendar = match calendar_path {
        Some(path) => match EventCalendar::load(&path) {
            Ok(calendar) => calendar,
            Err(e) => {
                tracing::warn!("event calendar unreadable ({}); continuing without it", e);
                EventCalendar::empty()
            }
        },
        None => EventCalendar::empty(),
    };

    let analyzer = HttpNewsAnalyzer::from_env().map(|a| Arc::new(a) as Arc<dyn NewsAnalyzer>);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("cancellation signal received; draining current phase");
                cancel.cancel();
            }
        });
    }

    let orchestrator = Orchestrator::new(
        config,
        PipelineDeps {
            provider,
            model_loader: None,
            analyzer,
            trainer: None,
            calendar,
            model_dir: PathBuf::from("models"),
        },
        cancel,
    );

    let mut exit = 0;
    for universe in selected_universes(&cli) {
        tracing::info!("running {} universe for {}", universe.name, date);
        match orchestrator.run(&universe, date).await {
            Ok(state) if state.cancelled => {
                println!(
                    "CANCELLED: universe={} scanned={} (partial state written)",
                    state.universe_name, state.scanned_count
                );
                return 2;
            }
            Ok(state) if state.scanned_count == 0 => {
                println!("FATAL: InsufficientData: no tickers survived scanning");
                exit = 1;
            }
            Ok(state) => print_ok(&state),
            Err(e) => {
                exit = fatal(&e);
            }
        }
    }

    exit
}
