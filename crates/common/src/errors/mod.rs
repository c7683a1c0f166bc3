//! Error types for the Lexigraph pipeline
//!
//! Provides a pipeline-wide error enum with:
//! - Distinct variants for each failure mode
//! - Mapping to the structured error categories used in metrics
//! - Conversions from the underlying library errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Categories for structured error records.
///
/// These names are the wire format: they appear verbatim in the metrics
/// export and in log output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    FetchError,
    RetrievalError,
    ExtractionError,
    LlmError,
    ValidationError,
    PersistenceError,
    PipelineError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::FetchError => "FETCH_ERROR",
            ErrorCategory::RetrievalError => "RETRIEVAL_ERROR",
            ErrorCategory::ExtractionError => "EXTRACTION_ERROR",
            ErrorCategory::LlmError => "LLM_ERROR",
            ErrorCategory::ValidationError => "VALIDATION_ERROR",
            ErrorCategory::PersistenceError => "PERSISTENCE_ERROR",
            ErrorCategory::PipelineError => "PIPELINE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    // Feed-level failures (whole request)
    #[error("Feed request failed with HTTP {status}: {message}")]
    FeedHttp { status: u16, message: String },

    #[error("Feed request timed out after {timeout_secs}s")]
    FeedTimeout { timeout_secs: u64 },

    #[error("Feed response could not be parsed: {message}")]
    FeedParse { message: String },

    // Per-document failures
    #[error("Document download failed for {url}: {message}")]
    Retrieval { url: String, message: String },

    #[error("Text extraction failed for {path}: {message}")]
    Extraction { path: String, message: String },

    // Model request failures (response-parse failures are per-record data,
    // recorded in metrics, and never surface as errors)
    #[error("Model request failed: {message}")]
    LlmRequest { message: String },

    // Configuration / intermediate-file failures
    #[error("Missing required configuration: {key}")]
    MissingConfig { key: String },

    #[error("Invalid configuration for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Batch file error for {path}: {message}")]
    BatchFile { path: String, message: String },

    // Storage failures
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Persistence failed for record {uuid}: {message}")]
    Persistence { uuid: String, message: String },

    // Infrastructure
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Get the structured error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::FeedHttp { .. }
            | PipelineError::FeedTimeout { .. }
            | PipelineError::FeedParse { .. } => ErrorCategory::FetchError,
            PipelineError::Retrieval { .. } => ErrorCategory::RetrievalError,
            PipelineError::Extraction { .. } => ErrorCategory::ExtractionError,
            PipelineError::LlmRequest { .. } => ErrorCategory::LlmError,
            PipelineError::MissingConfig { .. }
            | PipelineError::InvalidConfig { .. }
            | PipelineError::BatchFile { .. } => ErrorCategory::ValidationError,
            PipelineError::Database(_) | PipelineError::Persistence { .. } => {
                ErrorCategory::PersistenceError
            }
            PipelineError::Http(_) | PipelineError::Io(_) | PipelineError::Serialization(_) => {
                ErrorCategory::PipelineError
            }
        }
    }
}
