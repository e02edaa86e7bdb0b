use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

// Everything that can go wrong between reading the panel and validating
// the scenario estimates.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data file not found: {}", .0.display())]
    DataNotFound(PathBuf),

    #[error("failed to load data from {}: {source}", path.display())]
    DataLoad {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("estimation error: {0}")]
    Estimation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("linfa error: {0}")]
    Linfa(#[from] linfa::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub fn estimation(msg: impl Into<String>) -> Self {
        Self::Estimation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    // Load failures halt the pipeline; everything else is scoped to a stage.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::DataNotFound(_) | Self::DataLoad { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
