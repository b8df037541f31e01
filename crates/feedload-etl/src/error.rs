//! Error types of a pipeline run
//!
//! Chunk-scoped failures are [`SkipReason`]s: the chunk is logged and skipped
//! and the run continues. Run-scoped failures are [`FatalError`]s and end the
//! run as [`Aborted`].

use feedload_common::FeedloadError;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::RunSummary;
use crate::reader::{MalformedChunk, ReadError};
use crate::schema::SchemaCreationError;
use crate::sink::SinkError;
use crate::transform::TransformError;

/// Why a chunk was skipped
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error("malformed records: {0}")]
    Malformed(MalformedChunk),

    #[error("column(s) missing from source: {}", .columns.join(", "))]
    ColumnMissing { columns: Vec<String> },

    #[error("transformation failed: {0}")]
    Transform(String),

    #[error("load failed: {0}")]
    Load(#[source] SinkError),
}

impl SkipReason {
    /// Short machine-friendly label for log fields
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::Malformed(_) => "malformed",
            SkipReason::ColumnMissing { .. } => "column_missing",
            SkipReason::Transform(_) => "transform",
            SkipReason::Load(_) => "load",
        }
    }
}

impl From<TransformError> for SkipReason {
    fn from(e: TransformError) -> Self {
        match e {
            TransformError::ColumnMissing { columns } => SkipReason::ColumnMissing { columns },
            TransformError::Unexpected(msg) => SkipReason::Transform(msg),
        }
    }
}

impl From<MalformedChunk> for SkipReason {
    fn from(e: MalformedChunk) -> Self {
        SkipReason::Malformed(e)
    }
}

/// A condition that ends the run
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("invalid configuration: {0}")]
    Config(#[from] FeedloadError),

    #[error("source file not found: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    #[error("failed to create sink table: {0}")]
    SchemaCreation(#[from] SchemaCreationError),

    #[error("failed to read source: {0}")]
    SourceRead(#[source] ReadError),

    #[error("sink connection lost at chunk {chunk_index}: {source}")]
    ConnectionLost {
        chunk_index: usize,
        #[source]
        source: SinkError,
    },
}

impl FatalError {
    pub fn label(&self) -> &'static str {
        match self {
            FatalError::Config(_) => "config",
            FatalError::SourceNotFound { .. } => "source_not_found",
            FatalError::SchemaCreation(_) => "schema_creation",
            FatalError::SourceRead(_) => "source_read",
            FatalError::ConnectionLost { .. } => "connection_lost",
        }
    }
}

impl From<ReadError> for FatalError {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::SourceNotFound { path } => FatalError::SourceNotFound { path },
            other => FatalError::SourceRead(other),
        }
    }
}

/// The run ended on a fatal condition
///
/// Carries the cause and what had been achieved up to that point.
#[derive(Error, Debug)]
#[error("ETL run aborted: {cause}")]
pub struct Aborted {
    #[source]
    pub cause: FatalError,
    pub summary: RunSummary,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_column_missing_maps_to_its_own_reason() {
        let reason = SkipReason::from(TransformError::ColumnMissing {
            columns: vec!["seller_rating".to_string()],
        });
        assert_eq!(reason.label(), "column_missing");
        assert_eq!(reason.to_string(), "column(s) missing from source: seller_rating");

        let reason = SkipReason::from(TransformError::Unexpected("boom".to_string()));
        assert_eq!(reason.label(), "transform");
    }

    #[test]
    fn test_read_error_to_fatal() {
        let fatal = FatalError::from(ReadError::SourceNotFound {
            path: PathBuf::from("/data/feed.csv"),
        });
        assert!(matches!(fatal, FatalError::SourceNotFound { .. }));
        assert_eq!(fatal.to_string(), "source file not found: /data/feed.csv");

        let fatal = FatalError::from(ReadError::Header {
            path: PathBuf::from("/data/feed.csv"),
            reason: "empty".to_string(),
        });
        assert_eq!(fatal.label(), "source_read");
    }

    #[test]
    fn test_aborted_exposes_cause() {
        let aborted = Aborted {
            cause: FatalError::SourceNotFound {
                path: PathBuf::from("missing.csv"),
            },
            summary: RunSummary::default(),
        };
        assert!(aborted.to_string().contains("missing.csv"));
        assert!(std::error::Error::source(&aborted).is_some());
    }
}
