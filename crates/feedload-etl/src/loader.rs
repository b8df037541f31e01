//! Batch loader
//!
//! Writes one transformed chunk to the sink as a single transaction and turns
//! the result into a [`LoadOutcome`]. Nothing is propagated: statement-level
//! failures skip the chunk, connection-level failures are reported as fatal
//! for the orchestrator to act on.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{FatalError, SkipReason};
use crate::schema::TableSchema;
use crate::sink::Sink;
use crate::transform::TransformedChunk;

/// How a chunk ended
#[derive(Debug)]
pub enum ChunkStatus {
    Success,
    Skipped(SkipReason),
    Fatal(FatalError),
}

/// Result of processing one chunk, produced exactly once per chunk
#[derive(Debug)]
pub struct LoadOutcome {
    pub chunk_index: usize,
    /// Rows read from the source for this chunk
    pub rows_attempted: usize,
    pub rows_loaded: u64,
    /// Rows removed by the required-field check
    pub rows_dropped: usize,
    pub elapsed: Duration,
    pub status: ChunkStatus,
}

impl LoadOutcome {
    /// Outcome for a chunk skipped before reaching the sink
    pub fn skipped(
        chunk_index: usize,
        rows_attempted: usize,
        reason: SkipReason,
        elapsed: Duration,
    ) -> Self {
        Self {
            chunk_index,
            rows_attempted,
            rows_loaded: 0,
            rows_dropped: 0,
            elapsed,
            status: ChunkStatus::Skipped(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ChunkStatus::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, ChunkStatus::Skipped(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.status, ChunkStatus::Fatal(_))
    }
}

/// Appends transformed chunks to a [`Sink`]
#[derive(Debug, Clone)]
pub struct BatchLoader {
    schema: Arc<TableSchema>,
}

impl BatchLoader {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self { schema }
    }

    /// Load one chunk; `started` marks when processing of the chunk began
    pub async fn load(
        &self,
        sink: &mut dyn Sink,
        transformed: TransformedChunk,
        started: Instant,
    ) -> LoadOutcome {
        let TransformedChunk {
            chunk,
            rows_read,
            rows_dropped,
        } = transformed;

        let mut outcome = LoadOutcome {
            chunk_index: chunk.index,
            rows_attempted: rows_read,
            rows_loaded: 0,
            rows_dropped,
            elapsed: Duration::ZERO,
            status: ChunkStatus::Success,
        };

        if chunk.is_empty() {
            debug!(chunk_index = chunk.index, "No rows left to load");
            outcome.elapsed = started.elapsed();
            return outcome;
        }

        match sink.append(&self.schema, &chunk.rows).await {
            Ok(written) => outcome.rows_loaded = written,
            Err(e) if e.is_connection() => {
                outcome.status = ChunkStatus::Fatal(FatalError::ConnectionLost {
                    chunk_index: chunk.index,
                    source: e,
                });
            },
            Err(e) => outcome.status = ChunkStatus::Skipped(SkipReason::Load(e)),
        }

        outcome.elapsed = started.elapsed();
        outcome
    }
}
