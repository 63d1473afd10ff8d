//! Error types for the campaign assistant pipeline.

use thiserror::Error;

use crate::config::ConfigError;
use crate::llm::LlmError;

/// Errors surfaced to whoever drives a turn.
///
/// A failed synthesis step never shows up here: it degrades to the keyword
/// fallback inside [`crate::query::synthesize`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The utterance was rejected before any model call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The classifier's output did not match the decision structure.
    #[error("Could not parse intent decision: {0}")]
    ClassificationParse(String),

    /// The classifier's model call failed.
    #[error("Language model error: {0}")]
    Llm(#[from] LlmError),

    /// Store unreachable, filter malformed, or a record could not be decoded.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Response generation failed: {0}")]
    Response(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
