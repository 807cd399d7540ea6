//! Error types for the HMM inference library.

use thiserror::Error;

/// Result type alias for HMM operations.
pub type Result<T> = std::result::Result<T, HmmError>;

/// Errors that can occur during HMM inference and training.
#[derive(Error, Debug)]
pub enum HmmError {
    /// Input data has the wrong shape or contains invalid values
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model parameters violate probability constraints
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Trainer configuration is incomplete or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}
