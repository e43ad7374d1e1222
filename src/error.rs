//! Error types for the presence engine

use thiserror::Error;

/// Errors that can occur while configuring, feeding or scoring a session
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Input contract violation: {0}")]
    InputContract(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for a configuration error on a named field.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
