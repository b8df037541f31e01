//! Pipeline orchestrator
//!
//! Drives one run through `Idle -> SchemaReady -> Streaming -> Done`, or to
//! `Aborted` on a fatal condition from any non-terminal state:
//!
//! - `Idle`: the source must exist before anything is connected or created
//! - `SchemaReady`: the sink table exists
//! - `Streaming`: chunks are read, transformed and loaded one at a time
//!
//! Chunk-scoped failures are logged and skipped; the first fatal one ends
//! the run. The sink connection is opened once and closed on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use feedload_common::logging::RunLogger;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::EtlConfig;
use crate::error::{Aborted, FatalError};
use crate::loader::{BatchLoader, ChunkStatus, LoadOutcome};
use crate::reader::{self, ChunkReader, ReadError};
use crate::schema::{SchemaCreationError, SchemaRegistry, TableSchema};
use crate::sink::{Sink, SinkError, SqlSink};
use crate::transform::RowTransformer;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    SchemaReady,
    Streaming,
    Done,
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Aborted)
    }
}

/// Totals of a run, returned on success and carried by [`Aborted`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub chunks_processed: usize,
    pub chunks_loaded: usize,
    pub chunks_skipped: usize,
    /// Rows read from the source
    pub rows_attempted: u64,
    pub rows_loaded: u64,
    /// Rows removed because a required field was null
    pub rows_dropped: u64,
    /// Rows lost with skipped chunks
    pub rows_skipped: u64,
    pub elapsed: Duration,
    pub state: PipelineState,
}

impl RunSummary {
    /// Fold one chunk outcome into the totals
    pub fn record(&mut self, outcome: &LoadOutcome) {
        self.chunks_processed += 1;
        self.rows_attempted += outcome.rows_attempted as u64;
        self.rows_dropped += outcome.rows_dropped as u64;

        match outcome.status {
            ChunkStatus::Success => {
                self.chunks_loaded += 1;
                self.rows_loaded += outcome.rows_loaded;
            },
            ChunkStatus::Skipped(_) => {
                self.chunks_skipped += 1;
                self.rows_skipped +=
                    outcome.rows_attempted.saturating_sub(outcome.rows_dropped) as u64;
            },
            ChunkStatus::Fatal(_) => {},
        }
    }

    fn transition(&mut self, state: PipelineState) {
        debug!(from = ?self.state, to = ?state, "Pipeline state changed");
        self.state = state;
    }
}

/// One ETL run over a source file and a sink
///
/// # Example
///
/// ```no_run
/// use feedload_etl::{EtlConfig, Pipeline};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = EtlConfig::new("products.csv", "sqlite://feed.db?mode=rwc");
///     let summary = Pipeline::new(config).run().await?;
///     println!("{} rows loaded", summary.rows_loaded);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Pipeline {
    config: EtlConfig,
    schema: Arc<TableSchema>,
    logger: RunLogger,
}

impl Pipeline {
    /// Pipeline logging through the subscriber current at construction
    pub fn new(config: EtlConfig) -> Self {
        Self {
            config,
            schema: Arc::new(TableSchema::processed_data()),
            logger: RunLogger::current(),
        }
    }

    /// Log this run through `logger` instead
    pub fn with_logger(mut self, logger: RunLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// Run against the database named by the configuration
    pub async fn run(self) -> Result<RunSummary, Aborted> {
        let url = self.config.database_url.clone();
        let timeout = self.config.connect_timeout();
        let insert_batch_rows = self.config.insert_batch_rows;

        let connect = async move {
            SqlSink::connect(&url, timeout, insert_batch_rows)
                .await
                .map(|sink| Box::new(sink) as Box<dyn Sink>)
        };
        self.execute(connect).await
    }

    /// Run against an already connected sink
    pub async fn run_with_sink(self, sink: Box<dyn Sink>) -> Result<RunSummary, Aborted> {
        self.execute(async move { Ok(sink) }).await
    }

    async fn execute<F>(self, connect: F) -> Result<RunSummary, Aborted>
    where
        F: Future<Output = Result<Box<dyn Sink>, SinkError>>,
    {
        let Pipeline {
            config,
            schema,
            logger,
        } = self;

        let dispatch = logger.dispatch().clone();
        let run_id = Uuid::new_v4();
        let span = tracing::dispatcher::with_default(&dispatch, || info_span!("etl_run", %run_id));

        let result = drive(&config, schema, connect)
            .instrument(span)
            .with_subscriber(dispatch)
            .await;

        // Flushes the run's file writer, if any
        drop(logger);
        result
    }
}

async fn drive<F>(
    config: &EtlConfig,
    schema: Arc<TableSchema>,
    connect: F,
) -> Result<RunSummary, Aborted>
where
    F: Future<Output = Result<Box<dyn Sink>, SinkError>>,
{
    let started = Instant::now();
    let mut summary = RunSummary::default();

    info!(
        source = %config.source.display(),
        sink = %config.redacted_url(),
        batch_size = config.batch_size,
        "Starting ETL run"
    );

    if let Err(e) = config.validate() {
        return Err(abort(summary, started, e.into()));
    }

    if let Err(e) = reader::ensure_source_exists(&config.source) {
        return Err(abort(summary, started, e.into()));
    }

    let mut sink = match connect.await {
        Ok(sink) => sink,
        Err(e) => {
            let cause = FatalError::SchemaCreation(SchemaCreationError::Unreachable(e));
            return Err(abort(summary, started, cause));
        },
    };

    let result = stream(config, schema, sink.as_mut(), &mut summary).await;

    if let Err(e) = sink.close().await {
        warn!(error = %e, "Failed to close sink connection");
    }

    match result {
        Ok(()) => {
            summary.transition(PipelineState::Done);
            summary.elapsed = started.elapsed();
            info!(
                chunks_processed = summary.chunks_processed,
                chunks_loaded = summary.chunks_loaded,
                chunks_skipped = summary.chunks_skipped,
                rows_attempted = summary.rows_attempted,
                rows_loaded = summary.rows_loaded,
                rows_dropped = summary.rows_dropped,
                rows_skipped = summary.rows_skipped,
                elapsed_secs = summary.elapsed.as_secs_f64(),
                "ETL run complete"
            );
            Ok(summary)
        },
        Err(cause) => Err(abort(summary, started, cause)),
    }
}

/// SchemaReady and Streaming; returns the fatal cause if the run must end
async fn stream(
    config: &EtlConfig,
    schema: Arc<TableSchema>,
    sink: &mut dyn Sink,
    summary: &mut RunSummary,
) -> Result<(), FatalError> {
    SchemaRegistry::new(Arc::clone(&schema)).ensure_schema(sink).await?;
    summary.transition(PipelineState::SchemaReady);

    let chunks = ChunkReader::open(&config.source, config.reader_options())?;
    summary.transition(PipelineState::Streaming);

    let transformer = RowTransformer::new(Arc::clone(&schema));
    let loader = BatchLoader::new(schema);

    for next in chunks {
        let started = Instant::now();

        let outcome = match next {
            Ok(chunk) => {
                let (index, rows) = (chunk.index, chunk.len());
                match transformer.transform(chunk) {
                    Ok(transformed) => loader.load(sink, transformed, started).await,
                    Err(e) => LoadOutcome::skipped(index, rows, e.into(), started.elapsed()),
                }
            },
            Err(ReadError::Malformed(malformed)) => LoadOutcome::skipped(
                malformed.chunk_index,
                malformed.records,
                malformed.into(),
                started.elapsed(),
            ),
            Err(e) => return Err(e.into()),
        };

        log_outcome(&outcome);
        summary.record(&outcome);

        if let ChunkStatus::Fatal(cause) = outcome.status {
            return Err(cause);
        }
    }

    Ok(())
}

/// The single log event of a chunk
fn log_outcome(outcome: &LoadOutcome) {
    let elapsed_secs = outcome.elapsed.as_secs_f64();

    match &outcome.status {
        ChunkStatus::Success => info!(
            chunk_index = outcome.chunk_index,
            rows_loaded = outcome.rows_loaded,
            rows_dropped = outcome.rows_dropped,
            elapsed_secs,
            "Processed chunk of {} rows in {:.3} seconds",
            outcome.rows_attempted,
            elapsed_secs
        ),
        ChunkStatus::Skipped(reason) => warn!(
            chunk_index = outcome.chunk_index,
            rows = outcome.rows_attempted,
            reason = reason.label(),
            error = %reason,
            "Skipped chunk"
        ),
        ChunkStatus::Fatal(cause) => error!(
            chunk_index = outcome.chunk_index,
            rows = outcome.rows_attempted,
            error = %cause,
            "Chunk failed fatally"
        ),
    }
}

fn abort(mut summary: RunSummary, started: Instant, cause: FatalError) -> Aborted {
    summary.transition(PipelineState::Aborted);
    summary.elapsed = started.elapsed();

    error!(
        cause = cause.label(),
        error = %cause,
        chunks_processed = summary.chunks_processed,
        rows_loaded = summary.rows_loaded,
        "ETL run aborted"
    );

    Aborted { cause, summary }
}
