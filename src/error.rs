use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the preprocessing, training and prediction stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input batch must contain a '{0}' column")]
    MissingColumn(String),

    #[error("No valid rows remain after price cleaning")]
    EmptyBatch,

    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error(
        "Artifact {} has schema version {found}, expected {expected}",
        path.display()
    )]
    StaleArtifact {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid prediction input: {0}")]
    InvalidInput(String),

    #[error("Model prediction failed: {0}")]
    PredictionError(String),

    #[error("No {prefix}*.csv batch file found in {}", dir.display())]
    NoBatchFile { dir: PathBuf, prefix: String },

    #[error("Model '{name}' failed: {reason}")]
    Model { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
