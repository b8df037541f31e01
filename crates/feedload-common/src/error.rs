//! Error types shared by feedload crates

use thiserror::Error;

/// Result type alias for feedload operations
pub type Result<T> = std::result::Result<T, FeedloadError>;

/// Errors raised outside the per-batch pipeline flow
#[derive(Error, Debug)]
pub enum FeedloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl FeedloadError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<anyhow::Error> for FeedloadError {
    fn from(err: anyhow::Error) -> Self {
        Self::Logging(format!("{:#}", err))
    }
}
