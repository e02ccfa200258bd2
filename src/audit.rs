//! Fire-and-forget audit trail for executed statements
//!
//! Successful executions are recorded on a [`QueryLog`] by a background task.
//! Callers enqueue entries and move on; a failed write is logged and never
//! reaches the caller.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::execute::QuerySource;
use crate::store::QueryLog;

/// A persisted record of an executed statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub name: String,
    pub sql_text: String,
    /// The question that produced the statement, if any
    pub prompt: Option<String>,
    pub source: QuerySource,
    pub last_run_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Build an entry, naming it `"<source> query <timestamp>"` when no name is given
    pub fn new(
        sql_text: impl Into<String>,
        source: QuerySource,
        name: Option<String>,
        prompt: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let name = name.unwrap_or_else(|| default_name(source, now));
        Self {
            name,
            sql_text: sql_text.into(),
            prompt,
            source,
            last_run_at: now,
        }
    }
}

pub fn default_name(source: QuerySource, at: DateTime<Utc>) -> String {
    format!(
        "{} query {}",
        source,
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Sender half of the audit trail
#[derive(Debug, Clone)]
pub struct AuditTrail {
    tx: Option<mpsc::UnboundedSender<AuditEntry>>,
}

impl AuditTrail {
    /// Start the background writer.
    ///
    /// The returned handle completes once every `AuditTrail` clone has been
    /// dropped and the queue has drained.
    pub fn spawn(log: Arc<dyn QueryLog>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();
        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = log.record_query(&entry).await {
                    tracing::warn!(name = %entry.name, error = %e, "Failed to save query");
                } else {
                    tracing::debug!(name = %entry.name, "Saved query");
                }
            }
        });
        (Self { tx: Some(tx) }, handle)
    }

    /// A trail that drops every entry
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue an entry without waiting for it to be written
    pub fn record(&self, entry: AuditEntry) {
        if let Some(tx) = &self.tx {
            if tx.send(entry).is_err() {
                tracing::warn!("Audit writer has stopped; query not saved");
            }
        }
    }
}
