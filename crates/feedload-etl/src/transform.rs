//! Row transformer: cleaning and type coercion of raw chunks
//!
//! Applied to one chunk at a time with no I/O. For each row:
//!
//! 1. numeric cells that fail to parse become missing
//! 2. the boolean cell resolves to `false` when missing or unparseable
//! 3. missing numerics become zero
//! 4. rows whose required columns were null in the source are dropped
//!
//! A source header lacking any schema column fails the whole chunk with
//! [`TransformError::ColumnMissing`].

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::reader::{Chunk, RawRow, SourceHeader};
use crate::schema::{ColumnType, TableSchema};

/// A value conforming to its column's type
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(Option<String>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => v.as_deref(),
            _ => None,
        }
    }
}

/// A cleaned row, one value per schema column in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow {
    values: Vec<Value>,
}

impl TypedRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }
}

/// Result of transforming one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedChunk {
    pub chunk: Chunk<TypedRow>,
    /// Rows read from the source for this chunk
    pub rows_read: usize,
    /// Rows dropped for a null required field
    pub rows_dropped: usize,
}

/// Chunk-scoped transformation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("column(s) missing from source: {}", .columns.join(", "))]
    ColumnMissing { columns: Vec<String> },

    #[error("unexpected transformation failure: {0}")]
    Unexpected(String),
}

/// Parse a finite float, ignoring surrounding whitespace
pub fn parse_float(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an integer; integral floats such as `"12.0"` or `"1e3"` are accepted
pub fn parse_integer(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    if let Ok(v) = cell.parse::<i64>() {
        return Some(v);
    }

    // i64::MAX is not representable as f64; the bound below is 2^63
    const UPPER: f64 = 9_223_372_036_854_775_808.0;
    parse_float(cell).filter(|v| v.fract() == 0.0 && *v >= -UPPER && *v < UPPER).map(|v| v as i64)
}

/// Parse a boolean cell, `None` if it is not recognisable
pub fn parse_boolean(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        other => parse_float(other).map(|v| v != 0.0),
    }
}

/// Coerce one cell to `column_type`, substituting the type's zero value
pub fn coerce(column_type: ColumnType, cell: Option<&str>) -> Value {
    match column_type {
        ColumnType::Integer => Value::Integer(cell.and_then(parse_integer).unwrap_or(0)),
        ColumnType::Float => Value::Float(cell.and_then(parse_float).unwrap_or(0.0)),
        ColumnType::Boolean => Value::Boolean(cell.and_then(parse_boolean).unwrap_or(false)),
        ColumnType::Text => Value::Text(cell.map(str::to_string)),
    }
}

/// Cleans and type-coerces raw chunks against a [`TableSchema`]
#[derive(Debug, Clone)]
pub struct RowTransformer {
    schema: Arc<TableSchema>,
    required: Vec<usize>,
}

impl RowTransformer {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        let required = schema
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_required())
            .map(|(i, _)| i)
            .collect();
        Self { schema, required }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Source position of every schema column, in schema order
    fn locate_columns(&self, header: &SourceHeader) -> Result<Vec<usize>, TransformError> {
        let mut positions = Vec::with_capacity(self.schema.len());
        let mut missing = Vec::new();

        for column in self.schema.columns() {
            match header.position(column.name) {
                Some(i) => positions.push(i),
                None => missing.push(column.name.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(positions)
        } else {
            Err(TransformError::ColumnMissing { columns: missing })
        }
    }

    /// Transform one raw chunk into typed rows
    pub fn transform(&self, chunk: Chunk<RawRow>) -> Result<TransformedChunk, TransformError> {
        let rows_read = chunk.len();
        let Some(first) = chunk.rows.first() else {
            return Ok(TransformedChunk {
                chunk: Chunk::new(chunk.index, chunk.first_record, Vec::new()),
                rows_read,
                rows_dropped: 0,
            });
        };

        let header = Arc::clone(first.header());
        let positions = self.locate_columns(&header)?;

        let mut rows = Vec::with_capacity(rows_read);
        let mut rows_dropped = 0;

        for (offset, raw) in chunk.rows.iter().enumerate() {
            if raw.values().len() != header.len() {
                return Err(TransformError::Unexpected(format!(
                    "record {} has {} fields, header has {}",
                    chunk.first_record + offset as u64,
                    raw.values().len(),
                    header.len()
                )));
            }

            if self.required.iter().any(|&col| raw.value_at(positions[col]).is_none()) {
                rows_dropped += 1;
                continue;
            }

            let values = self
                .schema
                .columns()
                .iter()
                .zip(&positions)
                .map(|(column, &pos)| coerce(column.column_type, raw.value_at(pos)))
                .collect();
            rows.push(TypedRow::new(values));
        }

        debug!(
            chunk_index = chunk.index,
            rows_read,
            rows_kept = rows.len(),
            rows_dropped,
            "Transformed chunk"
        );

        Ok(TransformedChunk {
            chunk: Chunk::new(chunk.index, chunk.first_record, rows),
            rows_read,
            rows_dropped,
        })
    }
}
