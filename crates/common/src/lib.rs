//! Lexigraph Common Library
//!
//! Shared code for the Lexigraph pipeline including:
//! - Source record and batch types
//! - Database models and repository
//! - Error types and handling
//! - Configuration management
//! - Pipeline metrics and structured error tracking

pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod records;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{ErrorCategory, PipelineError, Result};
pub use metrics::PipelineMetrics;
pub use records::{RecordBatch, SourceRecord};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
