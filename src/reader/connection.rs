//! Connection string parsing for data sources
//!
//! Parses URI-style connection strings to determine database type and connection parameters.

use crate::{ChatsqlError, Result};

/// Parsed connection information
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionInfo {
    /// DuckDB in-memory database
    DuckDBMemory,
    /// DuckDB file-based database
    DuckDBFile(String),
    /// SQLite in-memory database
    SQLiteMemory,
    /// SQLite file-based database
    SQLite(String),
}

/// Parse a connection string into connection information
///
/// # Supported Formats
///
/// - `duckdb://memory` - DuckDB in-memory database
/// - `duckdb:///absolute/path/file.db` - DuckDB file (absolute path)
/// - `duckdb://relative/file.db` - DuckDB file (relative path)
/// - `sqlite://memory` - SQLite in-memory database
/// - `sqlite://path/file.db` - SQLite file
///
/// # Examples
///
/// ```
/// use chatsql::reader::connection::{parse_connection_string, ConnectionInfo};
///
/// let info = parse_connection_string("duckdb://memory").unwrap();
/// assert_eq!(info, ConnectionInfo::DuckDBMemory);
///
/// let info = parse_connection_string("sqlite://data.db").unwrap();
/// assert_eq!(info, ConnectionInfo::SQLite("data.db".to_string()));
/// ```
pub fn parse_connection_string(uri: &str) -> Result<ConnectionInfo> {
    if uri == "duckdb://memory" {
        return Ok(ConnectionInfo::DuckDBMemory);
    }

    if let Some(path) = uri.strip_prefix("duckdb://") {
        return Ok(ConnectionInfo::DuckDBFile(file_path("DuckDB", path)?));
    }

    if uri == "sqlite://memory" {
        return Ok(ConnectionInfo::SQLiteMemory);
    }

    if let Some(path) = uri.strip_prefix("sqlite://") {
        return Ok(ConnectionInfo::SQLite(file_path("SQLite", path)?));
    }

    Err(ChatsqlError::ReaderError(format!(
        "Unsupported connection string format: {}. Supported: duckdb://, sqlite://",
        uri
    )))
}

fn file_path(backend: &str, path: &str) -> Result<String> {
    if path.trim_start_matches('/').is_empty() {
        return Err(ChatsqlError::ReaderError(format!(
            "{} file path cannot be empty",
            backend
        )));
    }
    Ok(path.to_string())
}
