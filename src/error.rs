//! Pipeline error taxonomy.
//!
//! Guard errors (`ConcurrentProcessing`, `AlreadyProcessed`) leave the
//! artifact untouched. Everything else is recorded on the owning row as a
//! FAILED status plus `error_message` before being returned to the caller.
//! The status columns are the only failure channel callers are guaranteed
//! to see.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad input rejected before any state mutation (e.g. oversized file).
    #[error("{0}")]
    Validation(String),

    /// Another run holds the PROCESSING state for this record.
    #[error("{kind} {id} is already being processed")]
    ConcurrentProcessing { kind: &'static str, id: String },

    /// Terminal status reached and `force` was not given.
    #[error("{kind} {id} has already been processed. Use --force to retry")]
    AlreadyProcessed { kind: &'static str, id: String },

    /// Extension not present in the format registry.
    #[error("Unsupported file type.")]
    UnsupportedFormat,

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("{0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PipelineError {
    /// Whether this error should be written back as a FAILED status.
    /// Guard errors are no-ops by contract and must not clobber state.
    pub fn marks_failed(&self) -> bool {
        !matches!(
            self,
            PipelineError::ConcurrentProcessing { .. } | PipelineError::AlreadyProcessed { .. }
        )
    }
}
