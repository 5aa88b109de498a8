//! Domain error types for veil.
//!
//! Typed errors at module boundaries replace string-encoded errors and
//! enable structured error handling via pattern matching.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Anonymization pipeline errors
// ---------------------------------------------------------------------------

/// Errors from the anonymization pipeline.
///
/// Embedded in `anyhow::Error` so orchestrator signatures
/// (`-> anyhow::Result<...>`) stay unchanged while callers can downcast:
/// `e.downcast_ref::<AnonymizerError>()`.
#[derive(Debug, Error)]
pub enum AnonymizerError {
    #[error("Anonymization cancelled")]
    Cancelled,

    #[error("Anonymization interrupted")]
    Interrupted,

    #[error("Detector failed: {0}")]
    Detector(String),

    #[error("Store operation failed: {0}")]
    Persistence(String),
}

// ---------------------------------------------------------------------------
// Executor errors
// ---------------------------------------------------------------------------

/// Errors from the priority task executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor is shutting down")]
    ShuttingDown,

    #[error("Task cancelled before completion")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Tool errors
// ---------------------------------------------------------------------------

/// Errors scoped to a single tool call inside an agent step.
///
/// `NotFound` always aborts the loop; the other two are subject to the
/// configured tool error policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Failed to parse arguments for tool '{name}': {message}")]
    ArgumentParse { name: String, message: String },

    #[error("Tool '{name}' failed: {message}")]
    Execution { name: String, message: String },
}
