//! Query execution with timing and auditing
//!
//! Every statement the application runs, whether written by the completion
//! service or typed by a user, goes through [`QueryExecutor::execute`]:
//!
//! 1. trim and strip one trailing semicolon
//! 2. run against the reader, timed with a monotonic clock
//! 3. on success, queue an audit entry and return the rows
//!
//! Backend errors are returned to the caller and are not audited.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize, Serializer};

use crate::audit::{AuditEntry, AuditTrail};
use crate::protocol::strip_trailing_semicolon;
use crate::reader::Reader;
use crate::row::Row;
use crate::{ChatsqlError, Result};

/// Where a statement came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuerySource {
    /// Generated during a conversation
    Chat,
    /// Written directly by a user
    Scientist,
}

impl QuerySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuerySource::Chat => "chat",
            QuerySource::Scientist => "scientist",
        }
    }
}

impl fmt::Display for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuerySource {
    type Err = ChatsqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chat" => Ok(QuerySource::Chat),
            "scientist" => Ok(QuerySource::Scientist),
            other => Err(ChatsqlError::ValidationError(format!(
                "Unknown query source '{}'",
                other
            ))),
        }
    }
}

/// Context recorded alongside an executed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMetadata {
    pub source: QuerySource,
    pub prompt: Option<String>,
    pub name: Option<String>,
}

impl QueryMetadata {
    pub fn new(source: QuerySource) -> Self {
        Self {
            source,
            prompt: None,
            name: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Rows of a successful execution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub data: Vec<Row>,
    /// The statement as executed, after sanitizing
    pub sql: String,
    #[serde(rename = "executionTimeMs", serialize_with = "as_millis")]
    pub execution_time: Duration,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_nanos() as f64 / 1_000_000.0)
}

/// Trim and strip exactly one trailing semicolon
pub fn sanitize_sql(sql: &str) -> String {
    strip_trailing_semicolon(sql.trim()).to_string()
}

/// Runs statements against a reader and audits the successful ones
#[derive(Clone)]
pub struct QueryExecutor {
    reader: Arc<dyn Reader>,
    audit: AuditTrail,
    timeout: Option<Duration>,
}

impl QueryExecutor {
    pub fn new(reader: Arc<dyn Reader>, audit: AuditTrail) -> Self {
        Self {
            reader,
            audit,
            timeout: None,
        }
    }

    /// Abort executions that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn reader(&self) -> &Arc<dyn Reader> {
        &self.reader
    }

    pub async fn execute(&self, sql: &str, metadata: QueryMetadata) -> Result<QueryResult> {
        let sql = sanitize_sql(sql);
        let start = Instant::now();

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.reader.execute_sql(&sql))
                .await
                .map_err(|_| ChatsqlError::Timeout(limit))
                .and_then(|r| r),
            None => self.reader.execute_sql(&sql).await,
        };
        let execution_time = start.elapsed();

        let data = match outcome {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(
                    source = %metadata.source,
                    elapsed_ms = execution_time.as_millis() as u64,
                    error = %e,
                    "Query failed"
                );
                return Err(e);
            }
        };

        tracing::info!(
            source = %metadata.source,
            rows = data.len(),
            elapsed_ms = execution_time.as_millis() as u64,
            "Query executed"
        );

        self.audit.record(AuditEntry::new(
            sql.clone(),
            metadata.source,
            metadata.name,
            metadata.prompt,
        ));

        Ok(QueryResult {
            data,
            sql,
            execution_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, QueryLog};
    use async_trait::async_trait;
    use serde_json::json;

    /// Reader that records the statement it was given
    struct ScriptedReader {
        result: std::result::Result<Vec<Row>, String>,
        delay: Duration,
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedReader {
        fn ok(rows: Vec<Row>) -> Self {
            Self {
                result: Ok(rows),
                delay: Duration::ZERO,
                seen: Default::default(),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                result: Err(message.to_string()),
                delay: Duration::ZERO,
                seen: Default::default(),
            }
        }
    }

    #[async_trait]
    impl Reader for ScriptedReader {
        async fn execute_sql(&self, sql: &str) -> Result<Vec<Row>> {
            self.seen.lock().unwrap().push(sql.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone().map_err(ChatsqlError::ReaderError)
        }

        async fn execute_batch(&self, _sql: &str) -> Result<()> {
            Ok(())
        }

        fn dialect(&self) -> &'static str {
            "Test"
        }

        fn schema_query(&self) -> &'static str {
            ""
        }
    }

    fn one_row() -> Vec<Row> {
        vec![json!({"n": 3}).as_object().unwrap().clone()]
    }

    #[test]
    fn test_sanitize_sql() {
        assert_eq!(sanitize_sql("  SELECT 1;  "), "SELECT 1");
        assert_eq!(sanitize_sql("SELECT 1;;"), "SELECT 1;");
        assert_eq!(sanitize_sql("SELECT ';'"), "SELECT ';'");
    }

    #[test]
    fn test_source_round_trip() {
        assert_eq!("chat".parse::<QuerySource>().unwrap(), QuerySource::Chat);
        assert_eq!(QuerySource::Scientist.to_string(), "scientist");
        assert!("admin".parse::<QuerySource>().is_err());
    }

    #[tokio::test]
    async fn test_success_is_audited() {
        let reader = Arc::new(ScriptedReader::ok(one_row()));
        let store = Arc::new(MemoryStore::new());
        let (audit, worker) = AuditTrail::spawn(store.clone());
        let executor = QueryExecutor::new(reader.clone(), audit);

        let result = executor
            .execute(
                " SELECT COUNT(*) AS n FROM customers; ",
                QueryMetadata::new(QuerySource::Chat).with_prompt("how many customers?"),
            )
            .await
            .unwrap();

        assert_eq!(result.sql, "SELECT COUNT(*) AS n FROM customers");
        assert_eq!(result.data, one_row());
        assert_eq!(reader.seen.lock().unwrap()[0], "SELECT COUNT(*) AS n FROM customers");

        drop(executor);
        worker.await.unwrap();

        let entries = store.recent_queries(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sql_text, "SELECT COUNT(*) AS n FROM customers");
        assert_eq!(entries[0].prompt.as_deref(), Some("how many customers?"));
        assert!(entries[0].name.starts_with("chat query "));
    }

    #[tokio::test]
    async fn test_failure_is_not_audited() {
        let store = Arc::new(MemoryStore::new());
        let (audit, worker) = AuditTrail::spawn(store.clone());
        let executor = QueryExecutor::new(Arc::new(ScriptedReader::failing("no such table")), audit);

        let err = executor
            .execute("SELECT * FROM nope", QueryMetadata::new(QuerySource::Scientist))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such table"));

        drop(executor);
        worker.await.unwrap();
        assert!(store.recent_queries(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut reader = ScriptedReader::ok(one_row());
        reader.delay = Duration::from_secs(5);
        let executor = QueryExecutor::new(Arc::new(reader), AuditTrail::disabled())
            .with_timeout(Some(Duration::from_millis(20)));

        let err = executor
            .execute("SELECT 1", QueryMetadata::new(QuerySource::Chat))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatsqlError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_explicit_name() {
        let store = Arc::new(MemoryStore::new());
        let (audit, worker) = AuditTrail::spawn(store.clone());
        let executor = QueryExecutor::new(Arc::new(ScriptedReader::ok(one_row())), audit);

        executor
            .execute(
                "SELECT 1",
                QueryMetadata::new(QuerySource::Chat).with_name("Chat Query 10:00:00"),
            )
            .await
            .unwrap();
        drop(executor);
        worker.await.unwrap();

        assert_eq!(store.recent_queries(1).await.unwrap()[0].name, "Chat Query 10:00:00");
    }

    #[test]
    fn test_result_serializes_millis() {
        let result = QueryResult {
            data: Vec::new(),
            sql: "SELECT 1".to_string(),
            execution_time: Duration::from_millis(12),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["executionTimeMs"], json!(12.0));
    }
}
