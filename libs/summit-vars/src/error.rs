//! Variable Store Error Types

use thiserror::Error;

/// Result type for variable store operations
pub type Result<T> = std::result::Result<T, VarError>;

/// Variable store errors
#[derive(Debug, Error)]
pub enum VarError {
    /// Variable not found
    #[error("Variable not found: {0}")]
    NotFound(String),

    /// Invalid variable name or value
    #[error("Invalid variable: {0}")]
    Invalid(String),

    /// Snapshot I/O error
    #[error("Snapshot I/O error: {0}")]
    Io(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for VarError {
    fn from(err: std::io::Error) -> Self {
        VarError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VarError {
    fn from(err: serde_json::Error) -> Self {
        VarError::Serialization(err.to_string())
    }
}
