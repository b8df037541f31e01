//! Feedload Common Library
//!
//! Shared error handling and logging for the feedload workspace.
//!
//! - **Error Handling**: [`FeedloadError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`], process-wide initialization and
//!   per-run loggers
//!
//! # Example
//!
//! ```no_run
//! use feedload_common::logging::{init_logging, LogConfig};
//! use feedload_common::Result;
//!
//! fn main() -> Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{FeedloadError, Result};
