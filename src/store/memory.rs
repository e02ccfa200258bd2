//! In-process store, lost on exit

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{ChatSession, QueryLog, SessionStore};
use crate::audit::AuditEntry;
use crate::{ChatsqlError, Result};

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<Vec<ChatSession>>,
    queries: RwLock<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> ChatsqlError {
    ChatsqlError::StoreError(format!("Store lock poisoned: {}", e))
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, title: &str) -> Result<ChatSession> {
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
        };
        self.sessions.write().map_err(poisoned)?.push(session.clone());
        Ok(session)
    }

    async fn list_sessions(&self) -> Result<Vec<ChatSession>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.iter().rev().cloned().collect())
    }
}

#[async_trait]
impl QueryLog for MemoryStore {
    async fn record_query(&self, entry: &AuditEntry) -> Result<()> {
        self.queries.write().map_err(poisoned)?.push(entry.clone());
        Ok(())
    }

    async fn recent_queries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let queries = self.queries.read().map_err(poisoned)?;
        Ok(queries.iter().rev().take(limit).cloned().collect())
    }
}
