//! Failure taxonomy for the ingestion pipeline and its collaborators.
//!
//! Every stage-local failure is converted into a [`PipelineError`] so the
//! owning task can record a terminal, explainable state. Nothing in here
//! crosses a spawned-task boundary uncaught; the pipeline catches all of it
//! and writes it into the task's error payload.

use thiserror::Error;

/// Errors surfaced by the LLM client.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,
    #[error("LLM rate limited (HTTP 429)")]
    RateLimited,
    #[error("LLM returned malformed output: {0}")]
    Malformed(String),
    #[error("LLM request failed: {0}")]
    Request(String),
    #[error("no LLM provider configured")]
    Disabled,
}

impl LlmError {
    /// Transient failures are worth a bounded retry; malformed output and a
    /// disabled provider are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout | LlmError::RateLimited | LlmError::Request(_)
        )
    }
}

/// Errors produced while driving one document through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Retryable LLM failure that survived the bounded retry budget.
    #[error("transient LLM failure: {0}")]
    TransientLlm(String),

    /// Extraction cannot succeed for this input; triggers the rule-based
    /// fallback when enabled, otherwise terminal.
    #[error("extraction failed: {0}")]
    PermanentExtraction(String),

    /// Conflicting concurrent write to the graph store, surfaced after retry.
    #[error("graph write conflict: {0}")]
    GraphWriteConflict(String),

    /// Document rejected; the message is user-facing.
    #[error("{0}")]
    Validation(String),

    /// Cancellation observed at a stage boundary.
    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Malformed(msg) => PipelineError::PermanentExtraction(msg),
            LlmError::Disabled => {
                PipelineError::PermanentExtraction("no LLM provider configured".to_string())
            }
            other => PipelineError::TransientLlm(other.to_string()),
        }
    }
}
