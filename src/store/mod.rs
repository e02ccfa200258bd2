//! Record store for chat sessions and the query audit log
//!
//! Both concerns sit behind object-safe async traits so the chat controller
//! and the audit trail can be handed any backend. Records are append-only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::Result;

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// A persisted conversation header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, title: &str) -> Result<ChatSession>;

    /// All sessions, newest first
    async fn list_sessions(&self) -> Result<Vec<ChatSession>>;
}

#[async_trait]
pub trait QueryLog: Send + Sync {
    async fn record_query(&self, entry: &AuditEntry) -> Result<()>;

    /// Up to `limit` entries, most recently recorded first
    async fn recent_queries(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// Open a store from a location: `memory` or a SQLite file path
pub fn open(location: &str) -> Result<Arc<dyn Store>> {
    if location == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(SqliteStore::open(location)?))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Err(crate::ChatsqlError::StoreError(format!(
            "Cannot open '{}': built without SQLite support",
            location
        )))
    }
}

/// A backend providing both sessions and the query log
pub trait Store: SessionStore + QueryLog {
    fn as_session_store(self: Arc<Self>) -> Arc<dyn SessionStore>;
    fn as_query_log(self: Arc<Self>) -> Arc<dyn QueryLog>;
}

impl<T: SessionStore + QueryLog + 'static> Store for T {
    fn as_session_store(self: Arc<Self>) -> Arc<dyn SessionStore> {
        self
    }

    fn as_query_log(self: Arc<Self>) -> Arc<dyn QueryLog> {
        self
    }
}
