//! Conversational turn controller
//!
//! One call to [`ChatController::submit`] is one turn: the user's message is
//! appended to the conversation, answered, and exactly one assistant message is
//! appended in response (unless the message was blank).
//!
//! ```text
//! Idle → AwaitingSession → AwaitingAIResponse → ExecutingSQL → Idle
//!                                             ↘ NoSQL        ↗
//! ```
//!
//! Errors never escape a turn. Execution failures are shown inline with the
//! statement that failed; anything else becomes a generic apology and is logged.

mod preview;

pub use preview::{detect as detect_preview, PreviewColumn, TablePreview};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::completion::CompletionService;
use crate::config::ChatSettings;
use crate::execute::{QueryExecutor, QueryMetadata, QueryResult, QuerySource};
use crate::protocol::{self, ParsedResponse, SystemPrompt};
use crate::store::{ChatSession, SessionStore};
use crate::visualization::{Transformer, Visualization};
use crate::{ChatsqlError, Result};

pub const APOLOGY: &str =
    "I apologize, but I encountered an error while processing your request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Visualization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TablePreview>,
}

impl ChatMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            visualization: None,
            table: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }
}

/// State of one conversation, owned by its caller
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// Created on the first non-blank turn
    pub session: Option<ChatSession>,
    pub history: Vec<ChatMessage>,
    pub last_result: Option<QueryResult>,
    /// Wall time of the last turn that executed a query
    pub last_execution_time: Option<Duration>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.history.last()
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "error")]
pub enum TurnOutcome {
    /// Blank input, nothing appended
    Ignored,
    /// Answered with a table preview
    Preview,
    /// The reply contained no statement and was shown as is
    NoSql,
    /// A statement ran and its result was appended
    Answered,
    /// The statement failed; the error was shown to the user
    ExecutionFailed(String),
    /// The turn could not be completed; an apology was shown
    Failed(String),
}

/// Progress through a turn, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingSession,
    AwaitingAIResponse,
    ExecutingSql,
    NoSql,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::AwaitingSession => "awaiting_session",
            TurnState::AwaitingAIResponse => "awaiting_ai_response",
            TurnState::ExecutingSql => "executing_sql",
            TurnState::NoSql => "no_sql",
        };
        f.write_str(name)
    }
}

/// Drives conversation turns
pub struct ChatController {
    completion: Arc<dyn CompletionService>,
    sessions: Arc<dyn SessionStore>,
    executor: QueryExecutor,
    transformer: Transformer,
    settings: ChatSettings,
    system_prompt: String,
}

impl ChatController {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        sessions: Arc<dyn SessionStore>,
        executor: QueryExecutor,
        settings: ChatSettings,
    ) -> Self {
        let system_prompt = SystemPrompt::new(executor.reader().dialect()).render();
        let transformer = Transformer::new()
            .with_binding(settings.column_binding.clone())
            .with_style(settings.style.clone());
        Self {
            completion,
            sessions,
            executor,
            transformer,
            settings,
            system_prompt,
        }
    }

    /// List the reader's tables in the system instruction
    pub async fn with_schema(mut self) -> Result<Self> {
        let reader = self.executor.reader();
        let tables = reader.schema().await?;
        tracing::info!(tables = tables.len(), "Loaded schema for system instruction");
        self.system_prompt = SystemPrompt::new(reader.dialect())
            .with_tables(tables)
            .render();
        Ok(self)
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Run one turn of `conversation`
    pub async fn submit(&self, conversation: &mut Conversation, text: &str) -> TurnOutcome {
        if text.trim().is_empty() {
            return TurnOutcome::Ignored;
        }

        let started = Instant::now();
        conversation.history.push(ChatMessage::user(text));

        let outcome = match self.run_turn(conversation, text, started).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Chat turn failed");
                conversation.history.push(ChatMessage::assistant(APOLOGY));
                TurnOutcome::Failed(e.to_string())
            }
        };
        trace_state(TurnState::Idle);
        outcome
    }

    async fn run_turn(
        &self,
        conversation: &mut Conversation,
        text: &str,
        started: Instant,
    ) -> Result<TurnOutcome> {
        if conversation.session.is_none() {
            trace_state(TurnState::AwaitingSession);
            let title = format!("Chat {}", local_timestamp());
            conversation.session = Some(self.sessions.create_session(&title).await?);
        }

        if let Some(table) = preview::detect(text) {
            match self
                .executor
                .reader()
                .preview(table, self.settings.preview_limit)
                .await
            {
                Ok(rows) => {
                    let preview = TablePreview::from_rows(table, rows);
                    let mut message = ChatMessage::assistant(preview.message());
                    message.table = Some(preview);
                    conversation.history.push(message);
                    return Ok(TurnOutcome::Preview);
                }
                Err(e) => {
                    tracing::warn!(table, error = %e, "Table preview failed; asking the assistant instead");
                }
            }
        }

        trace_state(TurnState::AwaitingAIResponse);
        let reply = self.complete(&conversation.history).await?;
        let parsed = protocol::parse(&reply);

        let Some(sql) = parsed.sql.clone() else {
            trace_state(TurnState::NoSql);
            conversation.history.push(ChatMessage::assistant(reply));
            return Ok(TurnOutcome::NoSql);
        };

        trace_state(TurnState::ExecutingSql);
        let metadata = QueryMetadata::new(QuerySource::Chat)
            .with_prompt(text)
            .with_name(format!("Chat Query {}", local_timestamp()));

        match self.executor.execute(&sql, metadata).await {
            Ok(result) => {
                let visualization = match self
                    .transformer
                    .transform(&result.data, parsed.chart_type.as_deref())
                {
                    Ok(viz) => viz,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not build visualization");
                        None
                    }
                };

                let mut message = ChatMessage::assistant(answer_content(&parsed, &result.sql));
                message.visualization = visualization;
                conversation.history.push(message);
                conversation.last_result = Some(result);
                conversation.last_execution_time = Some(started.elapsed());
                Ok(TurnOutcome::Answered)
            }
            Err(e) => {
                let error = e.to_string();
                conversation
                    .history
                    .push(ChatMessage::assistant(failure_content(&parsed, &sql, &error)));
                Ok(TurnOutcome::ExecutionFailed(error))
            }
        }
    }

    async fn complete(&self, history: &[ChatMessage]) -> Result<String> {
        let request = self.completion.complete(&self.system_prompt, history);
        match self.settings.completion_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| ChatsqlError::Timeout(limit))?,
            None => request.await,
        }
    }
}

fn trace_state(state: TurnState) {
    tracing::debug!(%state, "Turn state");
}

fn local_timestamp() -> String {
    Local::now().format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}

fn answer_content(parsed: &ParsedResponse, sql: &str) -> String {
    let mut parts = Vec::new();
    if !parsed.explanation.is_empty() {
        parts.push(parsed.explanation.clone());
    }
    parts.push(format!("Here's the SQL query I used:\n```sql\n{}\n```", sql));
    if let Some(chart) = parsed.chart_type.as_deref().filter(|c| !c.is_empty()) {
        parts.push(format!("I suggest visualizing this data as a {}.", chart));
    }
    parts.join("\n\n")
}

fn failure_content(parsed: &ParsedResponse, sql: &str, error: &str) -> String {
    let mut parts = Vec::new();
    if !parsed.explanation.is_empty() {
        parts.push(parsed.explanation.clone());
    }
    parts.push(format!("I tried to run this SQL query:\n```sql\n{}\n```", sql));
    parts.push(format!("But there was an error: {}", error));
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditTrail;
    use crate::reader::Reader;
    use crate::row::Row;
    use crate::store::{MemoryStore, QueryLog};
    use crate::chart::ChartKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Completion service returning scripted replies and recording requests
    #[derive(Default)]
    struct ScriptedCompletion {
        replies: Mutex<VecDeque<Result<String>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
        delay: Option<Duration>,
    }

    impl ScriptedCompletion {
        fn replying(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                replies: Mutex::new(VecDeque::from(vec![Err(ChatsqlError::TransportError(
                    "connection reset".to_string(),
                ))])),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        async fn complete(&self, _system: &str, messages: &[ChatMessage]) -> Result<String> {
            self.requests.lock().unwrap().push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("No more replies".to_string()))
        }
    }

    /// Reader answering from fixed rows, or failing every statement
    struct FixedReader {
        rows: Vec<Row>,
        error: Option<String>,
        executed: Mutex<Vec<String>>,
    }

    impl FixedReader {
        fn new(rows: Vec<Row>) -> Self {
            Self {
                rows,
                error: None,
                executed: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: &str) -> Self {
            Self {
                rows: Vec::new(),
                error: Some(error.to_string()),
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Reader for FixedReader {
        async fn execute_sql(&self, sql: &str) -> Result<Vec<Row>> {
            self.executed.lock().unwrap().push(sql.to_string());
            match &self.error {
                Some(e) => Err(ChatsqlError::ReaderError(e.clone())),
                None => Ok(self.rows.clone()),
            }
        }

        async fn execute_batch(&self, _sql: &str) -> Result<()> {
            Ok(())
        }

        fn dialect(&self) -> &'static str {
            "Test"
        }

        fn schema_query(&self) -> &'static str {
            "SELECT 1"
        }
    }

    fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn region_rows() -> Vec<Row> {
        rows(vec![
            json!({"region": "east", "total": 10}),
            json!({"region": "west", "total": 20}),
        ])
    }

    struct Harness {
        controller: ChatController,
        completion: Arc<ScriptedCompletion>,
        reader: Arc<FixedReader>,
        store: Arc<MemoryStore>,
    }

    fn harness(completion: ScriptedCompletion, reader: FixedReader, settings: ChatSettings) -> Harness {
        let completion = Arc::new(completion);
        let reader = Arc::new(reader);
        let store = Arc::new(MemoryStore::new());
        let executor = QueryExecutor::new(reader.clone(), AuditTrail::disabled());
        let controller = ChatController::new(completion.clone(), store.clone(), executor, settings);
        Harness {
            controller,
            completion,
            reader,
            store,
        }
    }

    const BAR_REPLY: &str = "Here you go\n---SQL---\nSELECT region, SUM(amount) FROM sales GROUP BY region;\n---END SQL---\n---CHART---\nbar\n---END CHART---";

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let h = harness(ScriptedCompletion::default(), FixedReader::new(Vec::new()), ChatSettings::default());
        let mut conversation = Conversation::new();

        assert_eq!(h.controller.submit(&mut conversation, "   ").await, TurnOutcome::Ignored);
        assert!(conversation.history.is_empty());
        assert!(conversation.session.is_none());
        assert_eq!(h.completion.calls(), 0);
    }

    #[tokio::test]
    async fn test_table_preview_shortcut() {
        let customers = rows(vec![json!({"id": "c1", "branch_count": 3})]);
        let h = harness(ScriptedCompletion::default(), FixedReader::new(customers), ChatSettings::default());
        let mut conversation = Conversation::new();

        let outcome = h
            .controller
            .submit(&mut conversation, "show me the customers table")
            .await;

        assert_eq!(outcome, TurnOutcome::Preview);
        assert_eq!(h.completion.calls(), 0);
        assert_eq!(conversation.history.len(), 2);

        let reply = conversation.last_message().unwrap();
        assert_eq!(reply.role, Role::Assistant);
        let table = reply.table.as_ref().unwrap();
        assert_eq!(table.table, "customers");
        assert_eq!(table.columns[1].name, "Branch count");
        assert_eq!(
            h.reader.executed.lock().unwrap().as_slice(),
            ["SELECT * FROM \"customers\" LIMIT 100"]
        );
    }

    #[tokio::test]
    async fn test_failed_preview_falls_through() {
        let h = harness(
            ScriptedCompletion::replying(vec!["I can't find that table."]),
            FixedReader::failing("no such table: orders"),
            ChatSettings::default(),
        );
        let mut conversation = Conversation::new();

        let outcome = h.controller.submit(&mut conversation, "show me orders").await;
        assert_eq!(outcome, TurnOutcome::NoSql);
        assert_eq!(h.completion.calls(), 1);
        assert_eq!(conversation.last_message().unwrap().content, "I can't find that table.");
    }

    #[tokio::test]
    async fn test_sql_reply_is_executed_and_charted() {
        let h = harness(
            ScriptedCompletion::replying(vec![BAR_REPLY]),
            FixedReader::new(region_rows()),
            ChatSettings::default(),
        );
        let mut conversation = Conversation::new();

        let outcome = h.controller.submit(&mut conversation, "revenue by region").await;
        assert_eq!(outcome, TurnOutcome::Answered);

        assert_eq!(
            h.reader.executed.lock().unwrap().as_slice(),
            ["SELECT region, SUM(amount) FROM sales GROUP BY region"]
        );

        let reply = conversation.last_message().unwrap();
        assert!(reply.content.starts_with("Here you go"));
        assert!(reply.content.contains("```sql\nSELECT region, SUM(amount) FROM sales GROUP BY region\n```"));
        assert!(reply.content.ends_with("I suggest visualizing this data as a bar."));

        let viz = reply.visualization.as_ref().unwrap();
        assert_eq!(viz.kind, ChartKind::Bar);
        assert_eq!(viz.data.labels, vec!["east", "west"]);
        assert_eq!(viz.data.datasets[0].data, vec![10.0, 20.0]);

        assert_eq!(conversation.last_result.as_ref().unwrap().data.len(), 2);
        assert!(conversation.last_execution_time.is_some());
    }

    #[tokio::test]
    async fn test_plain_reply_is_verbatim() {
        let raw = "  Hello! Ask me about customers, orders or SKUs.\n";
        let h = harness(
            ScriptedCompletion::replying(vec![raw]),
            FixedReader::new(region_rows()),
            ChatSettings::default(),
        );
        let mut conversation = Conversation::new();

        let outcome = h.controller.submit(&mut conversation, "hi there").await;
        assert_eq!(outcome, TurnOutcome::NoSql);

        let reply = conversation.last_message().unwrap();
        assert_eq!(reply.content, raw);
        assert!(reply.visualization.is_none());
        assert!(h.reader.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execution_failure_is_shown_inline() {
        let h = harness(
            ScriptedCompletion::replying(vec![BAR_REPLY]),
            FixedReader::failing("Table with name sales does not exist"),
            ChatSettings::default(),
        );
        let mut conversation = Conversation::new();

        let outcome = h.controller.submit(&mut conversation, "revenue by region").await;
        assert!(matches!(outcome, TurnOutcome::ExecutionFailed(_)));
        assert_eq!(conversation.history.len(), 2);

        let reply = conversation.last_message().unwrap();
        assert!(reply.content.starts_with("Here you go"));
        assert!(reply.content.contains("I tried to run this SQL query:"));
        assert!(reply.content.contains("SELECT region, SUM(amount) FROM sales GROUP BY region"));
        assert!(reply.content.contains("Table with name sales does not exist"));
        assert!(conversation.last_result.is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_apologizes() {
        let h = harness(ScriptedCompletion::failing(), FixedReader::new(Vec::new()), ChatSettings::default());
        let mut conversation = Conversation::new();

        let outcome = h.controller.submit(&mut conversation, "how many customers?").await;
        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(conversation.history.len(), 2);
        assert_eq!(conversation.last_message().unwrap().content, APOLOGY);
    }

    #[tokio::test]
    async fn test_completion_timeout_apologizes() {
        let completion = ScriptedCompletion {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedCompletion::replying(vec!["late"])
        };
        let settings = ChatSettings {
            completion_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let h = harness(completion, FixedReader::new(Vec::new()), settings);
        let mut conversation = Conversation::new();

        let outcome = h.controller.submit(&mut conversation, "how many customers?").await;
        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(conversation.last_message().unwrap().content, APOLOGY);
    }

    #[tokio::test]
    async fn test_session_created_once_and_history_sent() {
        let h = harness(
            ScriptedCompletion::replying(vec!["first", "second"]),
            FixedReader::new(Vec::new()),
            ChatSettings::default(),
        );
        let mut conversation = Conversation::new();

        h.controller.submit(&mut conversation, "hello").await;
        h.controller.submit(&mut conversation, "and again").await;

        let sessions = h.store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].title.starts_with("Chat "));
        assert_eq!(conversation.session.as_ref().unwrap().id, sessions[0].id);

        let requests = h.completion.requests.lock().unwrap();
        assert_eq!(requests[1].len(), 3);
        assert_eq!(requests[1][0].content, "hello");
        assert_eq!(requests[1][1].content, "first");
        assert_eq!(conversation.history.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_result_has_no_visualization() {
        let h = harness(
            ScriptedCompletion::replying(vec![BAR_REPLY]),
            FixedReader::new(Vec::new()),
            ChatSettings::default(),
        );
        let mut conversation = Conversation::new();

        assert_eq!(
            h.controller.submit(&mut conversation, "revenue by region").await,
            TurnOutcome::Answered
        );
        assert!(conversation.last_message().unwrap().visualization.is_none());
    }

    #[tokio::test]
    async fn test_missing_named_column_still_answers() {
        let settings = ChatSettings {
            column_binding: crate::visualization::ColumnBinding::Named {
                label: "label".to_string(),
                value: "value".to_string(),
            },
            ..Default::default()
        };
        let h = harness(
            ScriptedCompletion::replying(vec![BAR_REPLY]),
            FixedReader::new(region_rows()),
            settings,
        );
        let mut conversation = Conversation::new();

        assert_eq!(
            h.controller.submit(&mut conversation, "revenue by region").await,
            TurnOutcome::Answered
        );
        assert!(conversation.last_message().unwrap().visualization.is_none());
    }

    #[tokio::test]
    async fn test_chat_queries_are_audited_with_prompt() {
        let store = Arc::new(MemoryStore::new());
        let (audit, worker) = AuditTrail::spawn(store.clone());
        let executor = QueryExecutor::new(Arc::new(FixedReader::new(region_rows())), audit);
        let controller = ChatController::new(
            Arc::new(ScriptedCompletion::replying(vec![BAR_REPLY])),
            store.clone(),
            executor,
            ChatSettings::default(),
        );

        let mut conversation = Conversation::new();
        controller.submit(&mut conversation, "revenue by region").await;
        drop(controller);
        worker.await.unwrap();

        let entries = store.recent_queries(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, QuerySource::Chat);
        assert_eq!(entries[0].prompt.as_deref(), Some("revenue by region"));
        assert!(entries[0].name.starts_with("Chat Query "));
    }

    #[test]
    fn test_system_prompt_uses_dialect() {
        let h = harness(ScriptedCompletion::default(), FixedReader::new(Vec::new()), ChatSettings::default());
        assert!(h.controller.system_prompt().contains("Test database"));
    }
}
