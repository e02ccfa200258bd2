//! DuckDB data source implementation
//!
//! Provides a reader for DuckDB databases that returns JSON row objects.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::{params, Connection};
use serde_json::Value;

use super::{connection::ConnectionInfo, is_ddl, with_connection, Reader};
use crate::row::Row;
use crate::{ChatsqlError, Result};

/// DuckDB database reader
///
/// Executes SQL queries against DuckDB databases (in-memory or file-based).
///
/// # Examples
///
/// ```rust,ignore
/// use chatsql::reader::{Reader, DuckDBReader};
///
/// // In-memory database
/// let reader = DuckDBReader::from_connection_string("duckdb://memory")?;
/// let rows = reader.execute_sql("SELECT 1 as x, 2 as y").await?;
///
/// // File-based database
/// let reader = DuckDBReader::from_connection_string("duckdb://data.db")?;
/// let rows = reader.execute_sql("SELECT * FROM sales").await?;
/// ```
pub struct DuckDBReader {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDBReader {
    /// Create a new DuckDB reader from a connection string
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The connection string format is invalid
    /// - The database file cannot be opened
    pub fn from_connection_string(uri: &str) -> Result<Self> {
        let conn_info = super::connection::parse_connection_string(uri)?;

        let conn = match conn_info {
            ConnectionInfo::DuckDBMemory => Connection::open_in_memory().map_err(|e| {
                ChatsqlError::ReaderError(format!("Failed to open in-memory DuckDB: {}", e))
            })?,
            ConnectionInfo::DuckDBFile(path) => Connection::open(&path).map_err(|e| {
                ChatsqlError::ReaderError(format!("Failed to open DuckDB file '{}': {}", path, e))
            })?,
            _ => {
                return Err(ChatsqlError::ReaderError(format!(
                    "Connection string '{}' is not supported by DuckDBReader",
                    uri
                )))
            }
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn query_rows(conn: &mut Connection, sql: &str) -> Result<Vec<Row>> {
    // DDL statements don't return rows
    if is_ddl(sql) {
        conn.execute(sql, params![])
            .map_err(|e| ChatsqlError::ReaderError(format!("Failed to execute DDL: {}", e)))?;
        return Ok(Vec::new());
    }

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ChatsqlError::ReaderError(format!("Failed to prepare SQL: {}", e)))?;

    let mut rows = stmt
        .query(params![])
        .map_err(|e| ChatsqlError::ReaderError(format!("Failed to execute SQL: {}", e)))?;

    // Column metadata is only available once the statement has run
    let column_names: Vec<String> = rows
        .as_ref()
        .map(|s| s.column_names())
        .unwrap_or_default();

    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| ChatsqlError::ReaderError(format!("Failed to iterate rows: {}", e)))?
    {
        let mut record = Row::new();
        for (idx, name) in column_names.iter().enumerate() {
            let value: DuckValue = row.get(idx).map_err(|e| {
                ChatsqlError::ReaderError(format!("Failed to read column '{}': {}", name, e))
            })?;
            record.insert(name.clone(), to_json(value));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => i.into(),
        DuckValue::SmallInt(i) => i.into(),
        DuckValue::Int(i) => i.into(),
        DuckValue::BigInt(i) => i.into(),
        DuckValue::UTinyInt(i) => i.into(),
        DuckValue::USmallInt(i) => i.into(),
        DuckValue::UInt(i) => i.into(),
        DuckValue::UBigInt(i) => i.into(),
        // Out-of-range integers keep their digits as text
        DuckValue::HugeInt(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        DuckValue::Float(f) => float(f as f64),
        DuckValue::Double(f) => float(f),
        DuckValue::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(float)
            .unwrap_or_else(|_| Value::String(d.to_string())),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + 719_163)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Timestamp(unit, v) => DateTime::from_timestamp_micros(micros(unit, v))
            .map(|t| Value::String(t.naive_utc().to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Blob(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        other => Value::String(format!("{:?}", other)),
    }
}

fn micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

// NaN and infinities have no JSON form
fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[async_trait]
impl Reader for DuckDBReader {
    async fn execute_sql(&self, sql: &str) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        with_connection(&self.conn, move |conn| query_rows(conn, &sql)).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        with_connection(&self.conn, move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| ChatsqlError::ReaderError(format!("Failed to execute batch: {}", e)))
        })
        .await
    }

    fn dialect(&self) -> &'static str {
        "DuckDB"
    }

    fn schema_query(&self) -> &'static str {
        "SELECT table_name, column_name, data_type \
         FROM information_schema.columns \
         WHERE table_schema = 'main' \
         ORDER BY table_name, ordinal_position"
    }
}
