//! Automation Engine Error Types

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Automation engine errors
///
/// Registration-time problems surface synchronously through these
/// variants. Dispatch-time failures are logged and counted instead; a
/// failing action never aborts the rest of its array.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input (bad rule, bad path expression, bad color string)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced rule, source or variable does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A fixed-capacity table is full
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation not supported by the target device
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Network-level failure (HTTP, WebSocket, SSH transport)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Local hardware failure (GPIO, LED)
    #[error("Hardware failure: {0}")]
    Hardware(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<summit_vars::VarError> for EngineError {
    fn from(err: summit_vars::VarError) -> Self {
        match err {
            summit_vars::VarError::NotFound(name) => EngineError::NotFound(name),
            other => EngineError::InvalidArgument(other.to_string()),
        }
    }
}

impl From<summit_jsonpath::PathError> for EngineError {
    fn from(err: summit_jsonpath::PathError) -> Self {
        EngineError::InvalidArgument(err.to_string())
    }
}
