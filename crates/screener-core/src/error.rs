use thiserror::Error;

/// Error taxonomy for the screening pipeline. Per-ticker kinds are caught at
/// phase boundaries and downgraded to warnings; only config, reporter and
/// state-write errors abort a run.
#[derive(Error, Debug)]
pub enum ScreenError {
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("model artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("sentiment analyzer unavailable: {0}")]
    AnalyzerUnavailable(String),

    #[error("regime fit failed: {0}")]
    RegimeFitFailed(String),

    #[error("corrupt cache entry: {0}")]
    CacheCorrupt(String),

    #[error("report generation failed: {0}")]
    ReporterFailed(String),

    #[error("state write failed: {0}")]
    StateWriteFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScreenError {
    /// True for the error kinds that must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScreenError::ConfigInvalid(_)
                | ScreenError::ReporterFailed(_)
                | ScreenError::StateWriteFailed(_)
        )
    }
}

pub type ScreenResult<T> = Result<T, ScreenError>;
