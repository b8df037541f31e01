//! Relational sink
//!
//! The pipeline talks to the database through the [`Sink`] trait so tests can
//! substitute a failing or recording implementation. [`SqlSink`] is the real
//! one: a single sqlx `AnyConnection`, so the same binary targets PostgreSQL
//! in production and SQLite for local runs.

use async_trait::async_trait;
use sqlx::any::{Any, AnyArguments};
use sqlx::query::Query;
use sqlx::{AnyConnection, Connection};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MAX_BIND_PARAMS;
use crate::schema::TableSchema;
use crate::transform::{TypedRow, Value};

/// Sink failures, split by whether the connection itself is gone
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink cannot be reached or the connection dropped
    #[error("sink connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    /// The sink rejected a statement; the connection is still usable
    #[error("sink rejected statement: {0}")]
    Statement(#[source] sqlx::Error),

    #[error("timed out connecting to sink after {0:?}")]
    ConnectTimeout(Duration),
}

impl SinkError {
    pub fn is_connection(&self) -> bool {
        matches!(self, SinkError::Connection(_) | SinkError::ConnectTimeout(_))
    }
}

impl From<sqlx::Error> for SinkError {
    fn from(e: sqlx::Error) -> Self {
        let connection = match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db.code().is_some_and(|code| ends_session(&code)),
            _ => false,
        };

        if connection {
            SinkError::Connection(e)
        } else {
            SinkError::Statement(e)
        }
    }
}

/// SQLSTATEs PostgreSQL reports right before it drops the session
///
/// Class `08` is a connection exception; `57P0x` means the backend was
/// terminated or the server is going away.
fn ends_session(sqlstate: &str) -> bool {
    sqlstate.starts_with("08") || sqlstate.starts_with("57P0")
}

/// Destination for typed rows
#[async_trait]
pub trait Sink: Send {
    /// Create the table for `schema` unless it already exists
    async fn create_table(&mut self, schema: &TableSchema) -> Result<(), SinkError>;

    /// Append `rows` atomically; either every row is stored or none is
    ///
    /// Returns the number of rows written.
    async fn append(&mut self, schema: &TableSchema, rows: &[TypedRow]) -> Result<u64, SinkError>;

    /// Release the connection
    async fn close(self: Box<Self>) -> Result<(), SinkError>;
}

/// [`Sink`] over a single sqlx connection
pub struct SqlSink {
    conn: AnyConnection,
    insert_batch_rows: usize,
}

impl SqlSink {
    /// Connect to `url`, giving up after `connect_timeout`
    ///
    /// `insert_batch_rows` bounds the rows of a single INSERT statement; larger
    /// appends are split into several statements inside one transaction.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        insert_batch_rows: usize,
    ) -> Result<Self, SinkError> {
        sqlx::any::install_default_drivers();

        let conn = tokio::time::timeout(connect_timeout, AnyConnection::connect(url))
            .await
            .map_err(|_| SinkError::ConnectTimeout(connect_timeout))?
            .map_err(SinkError::Connection)?;

        info!(backend = conn.backend_name(), "Connected to sink");

        Ok(Self {
            conn,
            insert_batch_rows: insert_batch_rows.max(1),
        })
    }

    pub fn backend_name(&self) -> &str {
        self.conn.backend_name()
    }
}

/// Rows per INSERT, kept under the bind parameter limit
fn rows_per_statement(insert_batch_rows: usize, width: usize) -> usize {
    let by_params = MAX_BIND_PARAMS / width.max(1);
    insert_batch_rows.min(by_params).max(1)
}

impl std::fmt::Debug for SqlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlSink")
            .field("backend", &self.conn.backend_name())
            .field("insert_batch_rows", &self.insert_batch_rows)
            .finish()
    }
}

fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Integer(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Boolean(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
    }
}

async fn insert_rows(
    conn: &mut AnyConnection,
    schema: &TableSchema,
    rows: &[TypedRow],
) -> Result<u64, sqlx::Error> {
    let sql = schema.insert_sql(rows.len());
    let mut query = sqlx::query(&sql);
    for row in rows {
        for value in row.values() {
            query = bind_value(query, value);
        }
    }

    let result = query.execute(conn).await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl Sink for SqlSink {
    async fn create_table(&mut self, schema: &TableSchema) -> Result<(), SinkError> {
        sqlx::query(&schema.create_table_sql())
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn append(&mut self, schema: &TableSchema, rows: &[TypedRow]) -> Result<u64, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let per_statement = rows_per_statement(self.insert_batch_rows, schema.len());
        let mut tx = self.conn.begin().await?;
        let mut written = 0;

        for batch in rows.chunks(per_statement) {
            match insert_rows(&mut *tx, schema, batch).await {
                Ok(n) => written += n,
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "Failed to roll back chunk transaction");
                    }
                    return Err(e.into());
                },
            }
        }

        tx.commit().await?;
        debug!(rows = written, statements = rows.len().div_ceil(per_statement), "Appended rows");
        Ok(written)
    }

    async fn close(self: Box<Self>) -> Result<(), SinkError> {
        self.conn.close().await.map_err(SinkError::Connection)
    }
}
