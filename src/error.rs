use polars::error::PolarsError;
use thiserror::Error;

/// Errors raised by the forecasting pipeline
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("insufficient history: need {needed} valid rows, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("data join failed: {0}")]
    DataJoin(String),

    #[error("feature count mismatch: expected {expected}, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("invalid training data: {0}")]
    InvalidTrainingData(String),

    #[error("artifact mismatch: {0}")]
    ArtifactMismatch(String),

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ForecastError {
    /// True when the failure only concerns one date's missing lookback history
    pub fn is_insufficient_history(&self) -> bool {
        matches!(self, ForecastError::InsufficientHistory { .. })
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
