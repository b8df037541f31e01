//! Run configuration
//!
//! [`EtlConfig`] is built from CLI arguments in the binary, or from the
//! environment with [`EtlConfig::from_env`]. Either way it is validated before
//! a run starts.

use feedload_common::{FeedloadError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::reader::{NullMarkers, ReaderOptions, DEFAULT_NULL_MARKERS};
use crate::schema::TableSchema;

// ============================================================================
// Default Configuration Constants
// ============================================================================

/// Rows per chunk
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Rows per INSERT statement within a chunk's transaction
pub const DEFAULT_INSERT_BATCH_ROWS: usize = 500;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_DELIMITER: char = ',';

/// Bind parameters allowed in one statement (SQLite; PostgreSQL allows 65535)
pub const MAX_BIND_PARAMS: usize = 32_766;

/// Configuration of one ETL run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EtlConfig {
    /// Delimited source file, optionally gzip-compressed (`.gz`)
    pub source: PathBuf,
    /// Sink connection string (`postgres://...` or `sqlite://...`)
    pub database_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_insert_batch_rows")]
    pub insert_batch_rows: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Cell values read as null in addition to blank cells
    #[serde(default = "default_null_markers")]
    pub null_markers: Vec<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_insert_batch_rows() -> usize {
    DEFAULT_INSERT_BATCH_ROWS
}

fn default_delimiter() -> char {
    DEFAULT_DELIMITER
}

fn default_null_markers() -> Vec<String> {
    DEFAULT_NULL_MARKERS.iter().map(|m| m.to_string()).collect()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl EtlConfig {
    /// Configuration with defaults for everything but the endpoints
    pub fn new(source: impl Into<PathBuf>, database_url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            database_url: database_url.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            insert_batch_rows: DEFAULT_INSERT_BATCH_ROWS,
            delimiter: DEFAULT_DELIMITER,
            null_markers: default_null_markers(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_insert_batch_rows(mut self, rows: usize) -> Self {
        self.insert_batch_rows = rows;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_null_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.null_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Load configuration from environment variables
    ///
    /// `FEEDLOAD_SOURCE` and `DATABASE_URL` are required. Unparseable numeric
    /// values fall back to their defaults and are then validated.
    pub fn from_env() -> Result<Self> {
        let source = std::env::var("FEEDLOAD_SOURCE")
            .map_err(|_| FeedloadError::config("FEEDLOAD_SOURCE not set"))?;
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| FeedloadError::config("DATABASE_URL not set"))?;

        let mut config = Self::new(source, database_url);

        config.batch_size = std::env::var("FEEDLOAD_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BATCH_SIZE);

        config.insert_batch_rows = std::env::var("FEEDLOAD_INSERT_BATCH_ROWS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_INSERT_BATCH_ROWS);

        config.connect_timeout_secs = std::env::var("DATABASE_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        if let Ok(delimiter) = std::env::var("FEEDLOAD_DELIMITER") {
            config.delimiter = parse_delimiter(&delimiter)?;
        }

        if let Ok(markers) = std::env::var("FEEDLOAD_NULL_MARKERS") {
            config.null_markers = markers.split(',').map(|s| s.trim().to_string()).collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(FeedloadError::config("Source path cannot be empty"));
        }

        if self.database_url.is_empty() {
            return Err(FeedloadError::config("Database URL cannot be empty"));
        }

        let scheme = self.database_url.split(':').next().unwrap_or_default();
        if !matches!(scheme, "postgres" | "postgresql" | "sqlite") {
            return Err(FeedloadError::config(format!(
                "Unsupported database URL scheme '{}' (expected postgres or sqlite)",
                scheme
            )));
        }

        if self.batch_size == 0 {
            return Err(FeedloadError::config("Batch size must be greater than 0"));
        }

        if self.insert_batch_rows == 0 {
            return Err(FeedloadError::config(
                "Insert batch rows must be greater than 0",
            ));
        }

        let width = TableSchema::processed_data().len();
        if self.insert_batch_rows.saturating_mul(width) > MAX_BIND_PARAMS {
            return Err(FeedloadError::config(format!(
                "Insert batch rows ({}) x columns ({}) exceeds the {} bind parameter limit",
                self.insert_batch_rows, width, MAX_BIND_PARAMS
            )));
        }

        if !self.delimiter.is_ascii() || matches!(self.delimiter, '"' | '\n' | '\r') {
            return Err(FeedloadError::config(format!(
                "Invalid delimiter {:?}: must be a single ASCII character other than a quote or newline",
                self.delimiter
            )));
        }

        if self.connect_timeout_secs == 0 {
            return Err(FeedloadError::config(
                "Connect timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Reader options derived from this configuration
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions::new(self.batch_size)
            .with_delimiter(self.delimiter as u8)
            .with_null_markers(NullMarkers::new(self.null_markers.iter().cloned()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Database URL with any password masked, safe for logs
    pub fn redacted_url(&self) -> String {
        redact_url(&self.database_url)
    }
}

/// Parse a delimiter argument; `\t` and `tab` name the tab character
pub fn parse_delimiter(value: &str) -> Result<char> {
    match value {
        "\\t" | "tab" => return Ok('\t'),
        _ => {},
    }

    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c),
        _ => Err(FeedloadError::config(format!(
            "Delimiter must be a single ASCII character, got '{}'",
            value
        ))),
    }
}

fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return url.to_string();
    };
    let userinfo = &rest[..at];
    match userinfo.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &url[..scheme_end + 3],
            &userinfo[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}
