//! Feedload ETL Library
//!
//! Loads a large delimited product feed into a relational table in bounded
//! chunks. Each chunk is read, cleaned and type-coerced, then appended to the
//! `processed_data` table in its own transaction.
//!
//! # Components
//!
//! - [`schema`]: the fixed 34-column target schema and table creation
//! - [`reader`]: lazy chunked reading of the source file
//! - [`transform`]: cleaning and coercion of raw rows
//! - [`loader`]: transactional append of one chunk
//! - [`sink`]: the database seam (`Sink` trait, sqlx-backed `SqlSink`)
//! - [`pipeline`]: the run state machine tying it together
//!
//! # Example
//!
//! ```no_run
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let summary = feedload_etl::run("products.csv", "postgres://localhost/feeds", 10_000).await?;
//!     println!("loaded {} of {} rows", summary.rows_loaded, summary.rows_attempted);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod reader;
pub mod schema;
pub mod sink;
pub mod transform;

use std::path::PathBuf;

pub use config::EtlConfig;
pub use error::{Aborted, FatalError, SkipReason};
pub use loader::{BatchLoader, ChunkStatus, LoadOutcome};
pub use pipeline::{Pipeline, PipelineState, RunSummary};
pub use reader::{Chunk, ChunkReader, RawRow, ReadError};
pub use schema::{ColumnSpec, ColumnType, SchemaRegistry, TableSchema};
pub use sink::{Sink, SinkError, SqlSink};
pub use transform::{RowTransformer, TransformError, TypedRow, Value};

/// Load `source` into the database at `database_url` with default settings
///
/// Invalid settings abort the run before anything is read.
pub async fn run(
    source: impl Into<PathBuf>,
    database_url: impl Into<String>,
    batch_size: usize,
) -> Result<RunSummary, Aborted> {
    let config = EtlConfig::new(source, database_url).with_batch_size(batch_size);
    Pipeline::new(config).run().await
}
