//! Path Evaluator Error Types

use thiserror::Error;

/// Result type for path operations
pub type Result<T> = std::result::Result<T, PathError>;

/// Path expression errors
#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    /// Malformed path expression
    #[error("Invalid path expression '{expr}': {reason}")]
    Syntax { expr: String, reason: String },
}

impl PathError {
    pub(crate) fn syntax(expr: &str, reason: impl Into<String>) -> Self {
        PathError::Syntax {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}
