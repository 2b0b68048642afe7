//! Unified error types for Inkwatch

use thiserror::Error;

/// Unified error type for all Inkwatch operations
///
/// A fragment that is not found, or a verification that times out, is a
/// normal result value and never surfaces as an error.
#[derive(Error, Debug)]
pub enum InkwatchError {
    // Document errors
    #[error("Node not found: {0}")]
    NodeNotFound(usize),

    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("Unsupported selector: {0}")]
    UnsupportedSelector(String),

    // Verification errors
    #[error("Expected fragment must not be empty")]
    EmptyFragment,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using InkwatchError
pub type Result<T> = std::result::Result<T, InkwatchError>;
