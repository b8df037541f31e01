//! Schema registry for the `processed_data` sink table
//!
//! Declares the fixed, ordered column set of the product feed and renders the
//! DDL/DML the sink needs. The table is created once per run if absent and is
//! never altered afterwards.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::sink::{Sink, SinkError};

/// Name of the sink table
pub const TABLE_NAME: &str = "processed_data";

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "string",
            ColumnType::Boolean => "boolean",
        }
    }

    /// SQL type understood by both PostgreSQL and SQLite
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a null source value disqualifies the whole row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Required,
    Optional,
}

/// One column of the target table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub role: ColumnRole,
}

impl ColumnSpec {
    pub const fn required(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            role: ColumnRole::Required,
        }
    }

    pub const fn optional(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            role: ColumnRole::Optional,
        }
    }

    pub fn is_required(&self) -> bool {
        self.role == ColumnRole::Required
    }
}

use ColumnType::{Boolean, Float, Integer, Text};

/// Column layout of the product feed, in table order
const PROCESSED_DATA_COLUMNS: [ColumnSpec; 34] = [
    ColumnSpec::required("product_id", Integer),
    ColumnSpec::required("sku_id", Integer),
    ColumnSpec::optional("platform_commission_rate", Float),
    ColumnSpec::optional("product_commission_rate", Float),
    ColumnSpec::optional("bonus_commission_rate", Float),
    ColumnSpec::optional("venture_category1_name_en", Text),
    ColumnSpec::optional("venture_category2_name_en", Text),
    ColumnSpec::optional("venture_category3_name_en", Text),
    ColumnSpec::optional("venture_category_name_local", Text),
    ColumnSpec::required("product_name", Text),
    ColumnSpec::optional("description", Text),
    ColumnSpec::optional("brand_name", Text),
    ColumnSpec::optional("seller_name", Text),
    ColumnSpec::optional("seller_url", Text),
    ColumnSpec::optional("product_url", Text),
    ColumnSpec::optional("product_small_img", Text),
    ColumnSpec::optional("product_medium_img", Text),
    ColumnSpec::optional("product_big_img", Text),
    ColumnSpec::optional("image_url_2", Text),
    ColumnSpec::optional("image_url_3", Text),
    ColumnSpec::optional("image_url_4", Text),
    ColumnSpec::optional("image_url_5", Text),
    ColumnSpec::optional("deeplink", Text),
    ColumnSpec::optional("availability", Text),
    ColumnSpec::optional("current_price", Float),
    ColumnSpec::optional("promotion_price", Float),
    ColumnSpec::optional("price", Float),
    ColumnSpec::optional("discount_percentage", Float),
    ColumnSpec::optional("number_of_reviews", Integer),
    ColumnSpec::optional("rating_avg_value", Float),
    ColumnSpec::optional("seller_rating", Float),
    ColumnSpec::optional("is_free_shipping", Boolean),
    ColumnSpec::optional("business_type", Text),
    ColumnSpec::optional("business_area", Text),
];

/// Ordered column set of a sink table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: &'static str,
    primary_key: &'static str,
    columns: Vec<ColumnSpec>,
}

impl TableSchema {
    /// The 34-column product feed table keyed by `product_id`
    pub fn processed_data() -> Self {
        Self {
            name: TABLE_NAME,
            primary_key: "product_id",
            columns: PROCESSED_DATA_COLUMNS.to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn primary_key(&self) -> &str {
        self.primary_key
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// Index of a column in table order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &ColumnSpec> + '_ {
        self.columns.iter().filter(|c| c.is_required())
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this schema
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                if c.name == self.primary_key {
                    format!("    {} {} NOT NULL PRIMARY KEY", c.name, c.column_type.sql_type())
                } else {
                    format!("    {} {}", c.name, c.column_type.sql_type())
                }
            })
            .collect::<Vec<_>>()
            .join(",\n");

        format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n)", self.name, columns)
    }

    /// Multi-row `INSERT` with `$n` placeholders for `row_count` rows
    ///
    /// Values must be bound row by row in column order.
    pub fn insert_sql(&self, row_count: usize) -> String {
        let width = self.columns.len();
        let column_list = self.column_names().collect::<Vec<_>>().join(", ");

        let mut sql = format!("INSERT INTO {} ({}) VALUES ", self.name, column_list);
        for row in 0..row_count {
            if row > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for col in 0..width {
                if col > 0 {
                    sql.push_str(", ");
                }
                sql.push('$');
                sql.push_str(&(row * width + col + 1).to_string());
            }
            sql.push(')');
        }
        sql
    }
}

/// The sink table could not be created
#[derive(Error, Debug)]
pub enum SchemaCreationError {
    #[error("sink is unreachable")]
    Unreachable(#[source] SinkError),

    #[error("sink rejected creation of table '{table}'")]
    Rejected {
        table: String,
        #[source]
        source: SinkError,
    },
}

/// Owns the target schema and makes sure the sink table exists
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schema: Arc<TableSchema>,
}

impl SchemaRegistry {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Create the sink table if it does not exist yet; no-op otherwise
    pub async fn ensure_schema(&self, sink: &mut dyn Sink) -> Result<(), SchemaCreationError> {
        debug!(table = self.schema.name(), "Ensuring sink table exists");

        sink.create_table(&self.schema).await.map_err(|e| {
            if e.is_connection() {
                SchemaCreationError::Unreachable(e)
            } else {
                SchemaCreationError::Rejected {
                    table: self.schema.name().to_string(),
                    source: e,
                }
            }
        })?;

        info!(
            table = self.schema.name(),
            columns = self.schema.len(),
            "Sink table ready"
        );
        Ok(())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new(Arc::new(TableSchema::processed_data()))
    }
}
