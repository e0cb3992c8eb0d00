//! Error types for localist-pipeline
//!
//! Per-item ingestion problems never surface here; they are counted on the
//! run. These variants are the failures that end a run or a call.

use thiserror::Error;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unknown agent name passed to the coordinator
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Source-level failure (auth, transport); aborts one collector run
    #[error("Source '{source_id}' failed: {message}")]
    SourceFailure { source_id: String, message: String },

    /// Fetcher failure outside any one source run
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// A raw record that cannot become a Bronze row
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Bad pipeline configuration (schedules, curator targets)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// localist-common error
    #[error(transparent)]
    Common(#[from] localist_common::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
