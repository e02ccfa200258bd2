//! Data source abstraction layer for chatsql
//!
//! The reader module provides a pluggable interface for executing SQL queries
//! against various data sources and returning ordered row objects.
//!
//! # Architecture
//!
//! All readers implement the `Reader` trait, which provides:
//! - SQL query execution → `Vec<Row>`
//! - Batch execution for setup statements
//! - Schema introspection for the system instruction
//! - Table previews
//!
//! The embedded database drivers are blocking; readers keep their connection
//! behind an `Arc<Mutex<_>>` and run every call on the blocking thread pool so
//! the async caller is never stalled.
//!
//! # Example
//!
//! ```rust,ignore
//! use chatsql::reader::{connect, Reader};
//!
//! let reader = connect("duckdb://memory")?;
//! reader.execute_batch("CREATE TABLE t AS SELECT 1 AS x").await?;
//! let rows = reader.execute_sql("SELECT x FROM t").await?;
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::row::{self, Row};
use crate::{ChatsqlError, Result};

#[cfg(feature = "duckdb")]
pub mod duckdb;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod connection;
pub mod data;

#[cfg(feature = "duckdb")]
pub use self::duckdb::DuckDBReader;

#[cfg(feature = "sqlite")]
pub use self::sqlite::SQLiteReader;

use connection::ConnectionInfo;

/// A table as presented to the completion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Column name and backend type name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

// ============================================================================
// Reader Trait
// ============================================================================

/// Trait for data source readers
///
/// Readers execute SQL queries and return rows whose key order matches the
/// column order of the result set.
///
/// # Errors
///
/// Statements the backend rejects (syntax errors, unknown tables, runtime
/// failures) are reported as `ChatsqlError::ReaderError`. Failures to reach
/// the backend at all are `ChatsqlError::TransportError`.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Execute a SQL query and return its rows
    async fn execute_sql(&self, sql: &str) -> Result<Vec<Row>>;

    /// Execute one or more statements that return no rows (DDL, inserts)
    async fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Name of the SQL dialect, used in the system instruction
    fn dialect(&self) -> &'static str;

    /// Query returning `table_name`, `column_name`, `data_type` rows for user tables
    fn schema_query(&self) -> &'static str;

    /// Introspect user tables and their columns
    async fn schema(&self) -> Result<Vec<TableSchema>> {
        let rows = self.execute_sql(self.schema_query()).await?;
        Ok(group_schema_rows(&rows))
    }

    /// Fetch up to `limit` rows of a table
    async fn preview(&self, table: &str, limit: usize) -> Result<Vec<Row>> {
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_identifier(table), limit);
        self.execute_sql(&sql).await
    }
}

/// Open a reader for a connection string
///
/// # Supported Formats
///
/// - `duckdb://memory`, `duckdb://path/file.db`
/// - `sqlite://memory`, `sqlite://path/file.db`
pub fn connect(uri: &str) -> Result<Arc<dyn Reader>> {
    match connection::parse_connection_string(uri)? {
        #[cfg(feature = "duckdb")]
        ConnectionInfo::DuckDBMemory | ConnectionInfo::DuckDBFile(_) => {
            Ok(Arc::new(DuckDBReader::from_connection_string(uri)?))
        }
        #[cfg(feature = "sqlite")]
        ConnectionInfo::SQLiteMemory | ConnectionInfo::SQLite(_) => {
            Ok(Arc::new(SQLiteReader::from_connection_string(uri)?))
        }
        #[allow(unreachable_patterns)]
        other => Err(ChatsqlError::ReaderError(format!(
            "No reader compiled in for {:?}. Rebuild with the matching feature enabled",
            other
        ))),
    }
}

/// Run a blocking closure against a shared connection on the blocking pool
pub(crate) async fn with_connection<C, T, F>(conn: &Arc<Mutex<C>>, f: F) -> Result<T>
where
    C: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut C) -> Result<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock().map_err(|e| {
            ChatsqlError::TransportError(format!(
                "Database connection unavailable (mutex poisoned): {}",
                e
            ))
        })?;
        f(&mut guard)
    })
    .await
    .map_err(|e| ChatsqlError::TransportError(format!("Database task failed: {}", e)))?
}

/// Whether a statement returns no rows and must be run with `execute`
pub(crate) fn is_ddl(sql: &str) -> bool {
    let trimmed = sql.trim_start().to_uppercase();
    ["CREATE ", "DROP ", "INSERT ", "UPDATE ", "DELETE ", "ALTER "]
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

/// Quote a table name for interpolation into SQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn group_schema_rows(rows: &[Row]) -> Vec<TableSchema> {
    let mut tables: Vec<TableSchema> = Vec::new();
    for r in rows {
        let table = row::to_label(r.get("table_name"));
        let column = ColumnInfo {
            name: row::to_label(r.get("column_name")),
            data_type: row::to_label(r.get("data_type")),
        };
        match tables.last_mut() {
            Some(last) if last.name == table => last.columns.push(column),
            _ => tables.push(TableSchema {
                name: table,
                columns: vec![column],
            }),
        }
    }
    tables
}
