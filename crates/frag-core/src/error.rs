//! Unified error types for Frag

use thiserror::Error;

/// Unified error type for all Frag operations
#[derive(Error, Debug)]
pub enum FragError {
    // Sandbox errors
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// The sandbox expired or was reclaimed. The step runner retries the job.
    #[error("Sandbox session unavailable: {0}")]
    SessionUnavailable(String),

    // Model errors
    #[error("Model error: {0}")]
    Model(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("API rate limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Tool errors
    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Malformed tool call: {0}")]
    MalformedToolCall(String),

    // Durable execution errors
    #[error("Step error: {0}")]
    Step(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl FragError {
    /// Whether the error means the sandbox is gone for good
    pub fn is_session_unavailable(&self) -> bool {
        matches!(self, FragError::SessionUnavailable(_))
    }
}

/// Result type alias using FragError
pub type Result<T> = std::result::Result<T, FragError>;
