//! Error types for the kubelogin CLI

use thiserror::Error;

/// Errors raised by the CLI itself, before the SDK is involved
#[derive(Debug, Error)]
pub enum CliError {
    /// Missing or invalid command line arguments
    #[error("{0}")]
    InvalidArgument(String),

    /// Configuration file or environment issues
    #[error("Configuration error: {0}")]
    Config(String),

    /// Interactive prompt failed
    #[error("Failed to read password")]
    Prompt(#[from] dialoguer::Error),
}

impl CliError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
