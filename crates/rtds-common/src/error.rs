//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, RtdsError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum RtdsError {
    #[error("Invalid owner id: {0}")]
    InvalidOwner(String),

    #[error("Invalid dataset type: {0}")]
    InvalidDatasetType(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
