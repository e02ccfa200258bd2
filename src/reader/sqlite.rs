//! SQLite data source implementation

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde_json::Value;

use super::{connection::ConnectionInfo, is_ddl, with_connection, Reader};
use crate::row::Row;
use crate::{ChatsqlError, Result};

/// SQLite database reader
///
/// ```rust,ignore
/// use chatsql::reader::{Reader, SQLiteReader};
///
/// let reader = SQLiteReader::from_connection_string("sqlite://memory")?;
/// let rows = reader.execute_sql("SELECT 1 AS x").await?;
/// ```
pub struct SQLiteReader {
    conn: Arc<Mutex<Connection>>,
}

impl SQLiteReader {
    pub fn from_connection_string(uri: &str) -> Result<Self> {
        let conn = match super::connection::parse_connection_string(uri)? {
            ConnectionInfo::SQLiteMemory => Connection::open_in_memory().map_err(|e| {
                ChatsqlError::ReaderError(format!("Failed to open in-memory SQLite: {}", e))
            })?,
            ConnectionInfo::SQLite(path) => Connection::open(&path).map_err(|e| {
                ChatsqlError::ReaderError(format!("Failed to open SQLite file '{}': {}", path, e))
            })?,
            _ => {
                return Err(ChatsqlError::ReaderError(format!(
                    "Connection string '{}' is not supported by SQLiteReader",
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
    if is_ddl(sql) {
        conn.execute(sql, params![])
            .map_err(|e| ChatsqlError::ReaderError(format!("Failed to execute DDL: {}", e)))?;
        return Ok(Vec::new());
    }

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ChatsqlError::ReaderError(format!("Failed to prepare SQL: {}", e)))?;

    let column_names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt
        .query(params![])
        .map_err(|e| ChatsqlError::ReaderError(format!("Failed to execute SQL: {}", e)))?;

    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| ChatsqlError::ReaderError(format!("Failed to iterate rows: {}", e)))?
    {
        let mut record = Row::new();
        for (idx, name) in column_names.iter().enumerate() {
            let cell = row.get_ref(idx).map_err(|e| {
                ChatsqlError::ReaderError(format!("Failed to read column '{}': {}", name, e))
            })?;
            record.insert(name.clone(), to_json(cell));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_json(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => i.into(),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[async_trait]
impl Reader for SQLiteReader {
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
        "SQLite"
    }

    fn schema_query(&self) -> &'static str {
        "SELECT m.name AS table_name, p.name AS column_name, p.type AS data_type \
         FROM sqlite_master m JOIN pragma_table_info(m.name) p \
         WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' \
         ORDER BY m.name, p.cid"
    }
}
