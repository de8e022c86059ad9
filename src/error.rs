//! Error types for rusty_rates

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the rate pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Rate source unavailable after {attempts} attempts: {last_error}")]
    SourceUnavailable { attempts: u32, last_error: String },

    #[error("Malformed snapshot {}: {reason}", path.display())]
    MalformedSnapshot { path: PathBuf, reason: String },

    #[error("Invalid rate value for {target_currency}: {reason}")]
    InvalidRateValue {
        target_currency: String,
        reason: String,
    },

    #[error("No silver data for {0}")]
    NoDataForDate(NaiveDate),

    #[error("Failed to write {target}: {reason}")]
    SinkWriteFailure { target: String, reason: String },

    #[error("Enrichment degraded after {attempts} attempts: {reason}")]
    EnrichmentDegraded { attempts: u32, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Columnar storage error: {0}")]
    ColumnarError(String),

    #[cfg(feature = "rusqlite-support")]
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether this error must abort the current run.
    ///
    /// Record-level rejects, empty days and a degraded narrative are
    /// reported but never stop the pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::InvalidRateValue { .. }
                | PipelineError::NoDataForDate(_)
                | PipelineError::EnrichmentDegraded { .. }
        )
    }

    pub(crate) fn sink(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        PipelineError::SinkWriteFailure {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<polars::prelude::PolarsError> for PipelineError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        PipelineError::ColumnarError(e.to_string())
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
