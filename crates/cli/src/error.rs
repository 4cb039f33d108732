//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Deployment could not be brought up or torn down
    #[error("Deployment failed: {message}")]
    Deployment { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn deployment(message: impl Into<String>) -> Self {
        Self::Deployment {
            message: message.into(),
        }
    }
}
