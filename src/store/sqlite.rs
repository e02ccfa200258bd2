//! SQLite-backed store

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{ChatSession, QueryLog, SessionStore};
use crate::audit::AuditEntry;
use crate::execute::QuerySource;
use crate::reader::with_connection;
use crate::{ChatsqlError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS queries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    sql_text TEXT NOT NULL,
    natural_language_description TEXT,
    source TEXT NOT NULL,
    last_run_at TEXT NOT NULL
);
";

/// Sessions and audit entries persisted in a SQLite file
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) a store file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            ChatsqlError::StoreError(format!("Failed to open store '{}': {}", path.display(), e))
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ChatsqlError::StoreError(format!("Failed to open store: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| ChatsqlError::StoreError(format!("Failed to create tables: {}", e)))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn store_err(e: rusqlite::Error) -> ChatsqlError {
    ChatsqlError::StoreError(e.to_string())
}

fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ChatsqlError::StoreError(format!("Bad timestamp '{}': {}", text, e)))
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, title: &str) -> Result<ChatSession> {
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
        };
        let record = session.clone();
        with_connection(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO chat_sessions (id, title, created_at) VALUES (?1, ?2, ?3)",
                params![record.id, record.title, record.created_at.to_rfc3339()],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await?;
        Ok(session)
    }

    async fn list_sessions(&self) -> Result<Vec<ChatSession>> {
        with_connection(&self.conn, |conn| {
            let mut stmt = conn
                .prepare("SELECT id, title, created_at FROM chat_sessions ORDER BY created_at DESC, rowid DESC")
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(store_err)?;

            let mut sessions = Vec::new();
            for row in rows {
                let (id, title, created_at) = row.map_err(store_err)?;
                sessions.push(ChatSession {
                    id,
                    title,
                    created_at: parse_time(&created_at)?,
                });
            }
            Ok(sessions)
        })
        .await
    }
}

#[async_trait]
impl QueryLog for SqliteStore {
    async fn record_query(&self, entry: &AuditEntry) -> Result<()> {
        let entry = entry.clone();
        with_connection(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO queries (name, sql_text, natural_language_description, source, last_run_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.name,
                    entry.sql_text,
                    entry.prompt,
                    entry.source.as_str(),
                    entry.last_run_at.to_rfc3339()
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn recent_queries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        with_connection(&self.conn, move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, sql_text, natural_language_description, source, last_run_at \
                     FROM queries ORDER BY id DESC LIMIT ?1",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(store_err)?;

            let mut entries = Vec::new();
            for row in rows {
                let (name, sql_text, prompt, source, last_run_at) = row.map_err(store_err)?;
                entries.push(AuditEntry {
                    name,
                    sql_text,
                    prompt,
                    source: source.parse::<QuerySource>()?,
                    last_run_at: parse_time(&last_run_at)?,
                });
            }
            Ok(entries)
        })
        .await
    }
}
