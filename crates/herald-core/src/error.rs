//! Error types shared by the process model and engine contract.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for process and engine operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// The engine rejected or failed a state transition.
    #[error("engine error: {0}")]
    Engine(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be read or is malformed.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// Creates an engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
