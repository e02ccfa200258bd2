/*!
chatsql REST API Server

Provides HTTP endpoints for conversational analytics: chat turns, direct SQL
execution, and the protocol/classifier helpers.

## Usage

```bash
chatsql-rest --host 127.0.0.1 --port 3334 --load-sample-data
```

## Endpoints

- `POST /api/v1/chat` - Run one conversation turn (starts a conversation without an id)
- `GET /api/v1/chat/:id` - Conversation history
- `DELETE /api/v1/chat/:id` - Drop a conversation
- `POST /api/v1/sql` - Execute SQL directly (optional chart and Vega-Lite output)
- `POST /api/v1/parse` - Split a completion reply into protocol sections
- `POST /api/v1/classify` - Suggest a chart kind for a metric
- `GET /api/v1/queries` - Recent audit entries
- `GET /api/v1/health` - Health check
- `GET /api/v1/version` - Version information
*/

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatsql::audit::{AuditEntry, AuditTrail};
use chatsql::chart::{palettes, ChartKind};
use chatsql::chat::{ChatController, ChatMessage, TurnOutcome};
use chatsql::completion::OpenRouterClient;
use chatsql::config::{self, CompletionSettings, Settings};
use chatsql::execute::{QueryMetadata, QueryExecutor, QuerySource};
use chatsql::protocol::{self, ParsedResponse};
use chatsql::reader::{self, data};
use chatsql::row::{self, Row};
use chatsql::session::ConversationManager;
use chatsql::store::{self, ChatSession, QueryLog};
use chatsql::visualization::{Transformer, Visualization};
use chatsql::writer::VegaLiteWriter;
use chatsql::{classify, ChatsqlError, VERSION};

/// CLI arguments for the REST API server
#[derive(Parser)]
#[command(name = "chatsql-rest")]
#[command(about = "chatsql REST API Server")]
#[command(version = VERSION)]
struct Cli {
    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind to
    #[arg(long, default_value = "3334")]
    port: u16,

    /// CORS allowed origins (comma-separated)
    #[arg(long, default_value = "*")]
    cors_origin: String,

    /// Data source connection string
    #[arg(long, default_value = "duckdb://memory")]
    reader: String,

    /// Load the sample customers/orders tables into the reader
    #[arg(long, default_value = "false")]
    load_sample_data: bool,

    /// Session and audit store (`memory` or a SQLite file path)
    #[arg(long, default_value = "memory")]
    store: String,

    /// Maximum rows returned by /api/v1/sql endpoint (0 = unlimited)
    #[arg(long, default_value = "10000")]
    sql_max_rows: usize,

    /// Minutes of inactivity before a conversation is dropped
    #[arg(long, default_value = "30")]
    session_timeout: u64,

    /// Completion model
    #[arg(long, env = "CHATSQL_MODEL", default_value = config::DEFAULT_MODEL)]
    model: String,

    /// Completion API key
    #[arg(long, env = "OPENROUTER_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    /// Chat-completions endpoint
    #[arg(long, env = "CHATSQL_API_URL", default_value = config::DEFAULT_API_URL)]
    api_url: String,

    /// Completion timeout in seconds (0 = no limit)
    #[arg(long, default_value = "60")]
    completion_timeout: u64,

    /// SQL execution timeout in seconds (0 = no limit)
    #[arg(long, default_value = "30")]
    query_timeout: u64,

    /// Color of single-series charts (any CSS color)
    #[arg(long, default_value = palettes::BRAND)]
    brand_color: String,

    /// Pie chart colors, comma-separated
    #[arg(long, value_delimiter = ',')]
    palette: Vec<String>,

    /// Column holding chart labels (requires --value-column)
    #[arg(long)]
    label_column: Option<String>,

    /// Column holding chart values (requires --label-column)
    #[arg(long)]
    value_column: Option<String>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    controller: Arc<ChatController>,
    conversations: Arc<ConversationManager>,
    query_log: Arc<dyn QueryLog>,
    /// Shapes results of /api/v1/sql with the same style as chat answers
    transformer: Transformer,
    /// Maximum rows returned by SQL endpoint (0 = unlimited)
    sql_max_rows: usize,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for /api/v1/chat endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    message: String,
    /// Continue an existing conversation
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Request body for /api/v1/sql endpoint
#[derive(Debug, Deserialize)]
struct SqlRequest {
    /// SQL query to execute
    query: String,
    /// Chart kind to shape the result as
    #[serde(default)]
    chart: Option<String>,
    /// Output writer for the chart (vegalite)
    #[serde(default)]
    writer: Option<String>,
}

/// Request body for /api/v1/parse endpoint
#[derive(Debug, Deserialize)]
struct ParseRequest {
    /// Raw completion reply
    response: String,
}

/// Request body for /api/v1/classify endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    calculation_method: String,
}

#[derive(Debug, Deserialize)]
struct QueriesParams {
    limit: Option<usize>,
}

/// Successful API response
#[derive(Debug, Serialize)]
struct ApiSuccess<T> {
    status: String,
    data: T,
}

fn success<T>(data: T) -> Json<ApiSuccess<T>> {
    Json(ApiSuccess {
        status: "success".to_string(),
        data,
    })
}

/// Error API response
#[derive(Debug, Serialize)]
struct ApiError {
    status: String,
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

/// Result of one chat turn
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResult {
    conversation_id: String,
    #[serde(flatten)]
    outcome: TurnOutcome,
    /// The assistant message appended by the turn
    message: Option<ChatMessage>,
}

/// A conversation's history
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationResult {
    conversation_id: String,
    session: Option<ChatSession>,
    messages: Vec<ChatMessage>,
    last_execution_time_ms: Option<f64>,
}

/// SQL execution result data
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SqlResult {
    /// Array of row objects
    rows: Vec<Row>,
    /// Column names
    columns: Vec<String>,
    /// Total row count before truncation
    row_count: usize,
    /// Whether results were truncated due to row limit
    truncated: bool,
    execution_time_ms: f64,
    /// Chart series built from all rows, before truncation
    #[serde(skip_serializing_if = "Option::is_none")]
    visualization: Option<Visualization>,
    /// Writer output for the visualization
    #[serde(skip_serializing_if = "Option::is_none")]
    spec: Option<serde_json::Value>,
}

/// Parse result data
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParseResult {
    #[serde(flatten)]
    parsed: ParsedResponse,
    /// The chart kind the tag resolves to
    chart_kind: Option<ChartKind>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyResult {
    chart_type: ChartKind,
    label: &'static str,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    active_conversations: usize,
}

/// Version response
#[derive(Debug, Serialize)]
struct VersionResponse {
    version: String,
    features: Vec<String>,
}

// ============================================================================
// Error Handling
// ============================================================================

/// Custom error type for API responses
struct ApiErrorResponse {
    status: StatusCode,
    error: ApiError,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, error_type: &str, message: String) -> Self {
        ApiErrorResponse {
            status,
            error: ApiError {
                status: "error".to_string(),
                error: ErrorDetails {
                    message,
                    error_type: error_type.to_string(),
                },
            },
        }
    }

    fn conversation_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NotFound",
            format!("Conversation '{}' not found", id),
        )
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let json = Json(self.error);
        (self.status, json).into_response()
    }
}

impl From<ChatsqlError> for ApiErrorResponse {
    fn from(err: ChatsqlError) -> Self {
        let (status, error_type) = match &err {
            ChatsqlError::ReaderError(_) => (StatusCode::BAD_REQUEST, "ReaderError"),
            ChatsqlError::ValidationError(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
            ChatsqlError::MissingColumn { .. } => (StatusCode::BAD_REQUEST, "MissingColumn"),
            ChatsqlError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Timeout"),
            ChatsqlError::TransportError(_) => (StatusCode::BAD_GATEWAY, "TransportError"),
            ChatsqlError::CompletionError(_) => (StatusCode::BAD_GATEWAY, "CompletionError"),
            ChatsqlError::StoreError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StoreError"),
            ChatsqlError::WriterError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "WriterError"),
            ChatsqlError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };
        Self::new(status, error_type, err.to_string())
    }
}

impl From<String> for ApiErrorResponse {
    fn from(msg: String) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", msg)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/chat - Run one turn
async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ApiSuccess<ChatResult>>, ApiErrorResponse> {
    let (id, handle) = match state.conversations.resolve(request.conversation_id.as_deref()) {
        Some(found) => found,
        None => {
            let id = request.conversation_id.unwrap_or_default();
            return Err(ApiErrorResponse::conversation_not_found(&id));
        }
    };

    // Turns on one conversation are serialized by its lock
    let mut conversation = handle.lock().await;
    let before = conversation.history.len();
    let outcome = state.controller.submit(&mut conversation, &request.message).await;
    info!(conversation = %id, ?outcome, "Chat turn finished");

    let message = if conversation.history.len() > before {
        conversation.last_message().cloned()
    } else {
        None
    };

    Ok(success(ChatResult {
        conversation_id: id,
        outcome,
        message,
    }))
}

/// GET /api/v1/chat/:id - Conversation history
async fn get_chat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiSuccess<ConversationResult>>, ApiErrorResponse> {
    let handle = state
        .conversations
        .get(&id)
        .ok_or_else(|| ApiErrorResponse::conversation_not_found(&id))?;
    let conversation = handle.lock().await;

    Ok(success(ConversationResult {
        conversation_id: id,
        session: conversation.session.clone(),
        messages: conversation.history.clone(),
        last_execution_time_ms: conversation
            .last_execution_time
            .map(|d| d.as_secs_f64() * 1000.0),
    }))
}

/// DELETE /api/v1/chat/:id - Drop a conversation
async fn delete_chat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiSuccess<serde_json::Value>>, ApiErrorResponse> {
    if !state.conversations.remove(&id) {
        return Err(ApiErrorResponse::conversation_not_found(&id));
    }
    info!(conversation = %id, "Conversation removed");
    Ok(success(serde_json::json!({ "conversationId": id, "deleted": true })))
}

/// POST /api/v1/sql - Execute SQL directly
async fn sql_handler(
    State(state): State<AppState>,
    Json(request): Json<SqlRequest>,
) -> Result<Json<ApiSuccess<SqlResult>>, ApiErrorResponse> {
    info!("Executing SQL: {} chars", request.query.len());

    let result = state
        .controller
        .executor()
        .execute(&request.query, QueryMetadata::new(QuerySource::Scientist))
        .await?;

    let visualization = match request.chart.as_deref() {
        Some(tag) => state.transformer.transform(&result.data, Some(tag))?,
        None => None,
    };

    let spec = match (request.writer.as_deref(), &visualization) {
        (None, _) => None,
        (Some("vegalite"), Some(viz)) => Some(VegaLiteWriter::new().to_value(viz)?),
        (Some("vegalite"), None) => {
            return Err("The vegalite writer needs a chart and a non-empty result".to_string().into())
        }
        (Some(other), _) => return Err(format!("Unknown writer: {}", other).into()),
    };

    let columns = result.data.first().map(row::column_names).unwrap_or_default();
    let total_rows = result.data.len();
    let execution_time_ms = result.execution_time.as_secs_f64() * 1000.0;

    let mut rows = result.data;
    let truncated = state.sql_max_rows > 0 && total_rows > state.sql_max_rows;
    if truncated {
        info!(
            "Truncating SQL results from {} to {} rows",
            total_rows, state.sql_max_rows
        );
        rows.truncate(state.sql_max_rows);
    }

    Ok(success(SqlResult {
        rows,
        columns,
        row_count: total_rows,
        truncated,
        execution_time_ms,
        visualization,
        spec,
    }))
}

/// POST /api/v1/parse - Split a completion reply
async fn parse_handler(Json(request): Json<ParseRequest>) -> Json<ApiSuccess<ParseResult>> {
    let parsed = protocol::parse(&request.response);
    let chart_kind = parsed.chart_kind();
    success(ParseResult { parsed, chart_kind })
}

/// POST /api/v1/classify - Suggest a chart kind
async fn classify_handler(Json(request): Json<ClassifyRequest>) -> Json<ApiSuccess<ClassifyResult>> {
    let chart_type = classify(&request.calculation_method, &request.name);
    success(ClassifyResult {
        chart_type,
        label: chart_type.label(),
    })
}

/// GET /api/v1/queries - Recent audit entries
async fn queries_handler(
    State(state): State<AppState>,
    Query(params): Query<QueriesParams>,
) -> Result<Json<ApiSuccess<Vec<AuditEntry>>>, ApiErrorResponse> {
    let limit = params.limit.unwrap_or(50);
    let entries = state.query_log.recent_queries(limit).await?;
    Ok(success(entries))
}

/// GET /api/v1/health - Health check
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
        active_conversations: state.conversations.count(),
    })
}

/// GET /api/v1/version - Version information
async fn version_handler() -> Json<VersionResponse> {
    let mut features = Vec::new();

    #[cfg(feature = "duckdb")]
    features.push("duckdb".to_string());

    #[cfg(feature = "sqlite")]
    features.push("sqlite".to_string());

    features.push("vegalite".to_string());

    Json(VersionResponse {
        version: VERSION.to_string(),
        features,
    })
}

/// Root handler
async fn root_handler() -> &'static str {
    "chatsql REST API Server - See /api/v1/health for status"
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/v1/chat", post(chat_handler))
        .route(
            "/api/v1/chat/:id",
            get(get_chat_handler).delete(delete_chat_handler),
        )
        .route("/api/v1/sql", post(sql_handler))
        .route("/api/v1/parse", post(parse_handler))
        .route("/api/v1/classify", post(classify_handler))
        .route("/api/v1/queries", get(queries_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/version", get(version_handler))
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatsql_rest=info,chatsql=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    let settings = Settings {
        completion: CompletionSettings {
            api_url: cli.api_url.clone(),
            api_key: cli.api_key.clone(),
            model: cli.model.clone(),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut chat_settings = settings
        .chat
        .with_colors(&cli.brand_color, &cli.palette)?
        .with_columns(cli.label_column.clone(), cli.value_column.clone())?;
    chat_settings.completion_timeout = config::seconds(Some(cli.completion_timeout));
    chat_settings.query_timeout = config::seconds(Some(cli.query_timeout));
    if settings.completion.api_key.is_empty() {
        tracing::warn!("No API key configured; chat turns will fail until OPENROUTER_API_KEY is set");
    }

    info!("Connecting to {}", cli.reader);
    let reader = reader::connect(&cli.reader)?;
    if cli.load_sample_data {
        info!("Loading sample data ({})", data::SAMPLE_TABLES.join(", "));
        data::load_sample_data(reader.as_ref()).await?;
    }

    let store = store::open(&cli.store)?;
    let query_log = store.clone().as_query_log();
    let (audit, _audit_worker) = AuditTrail::spawn(query_log.clone());
    let executor = QueryExecutor::new(reader, audit).with_timeout(chat_settings.query_timeout);
    let transformer = Transformer::new()
        .with_binding(chat_settings.column_binding.clone())
        .with_style(chat_settings.style.clone());

    let controller = ChatController::new(
        Arc::new(OpenRouterClient::new(settings.completion)),
        store.as_session_store(),
        executor,
        chat_settings,
    )
    .with_schema()
    .await?;

    let conversations = Arc::new(ConversationManager::new(cli.session_timeout));
    spawn_sweeper(conversations.clone());

    // Create application state
    let state = AppState {
        controller: Arc::new(controller),
        conversations,
        query_log,
        transformer,
        sql_max_rows: cli.sql_max_rows,
    };

    // Configure CORS
    let cors = if cli.cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    } else {
        let origins: Vec<_> = cli
            .cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    };

    let app = build_router(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;

    info!("Starting chatsql REST API server on {}", addr);
    info!("API documentation:");
    info!("  POST   /api/v1/chat     - Run one conversation turn");
    info!("  GET    /api/v1/chat/:id - Conversation history");
    info!("  DELETE /api/v1/chat/:id - Drop a conversation");
    info!("  POST   /api/v1/sql      - Execute SQL directly");
    info!("  POST   /api/v1/parse    - Parse a completion reply");
    info!("  POST   /api/v1/classify - Suggest a chart kind");
    info!("  GET    /api/v1/queries  - Recent audit entries");
    info!("  GET    /api/v1/health   - Health check");
    info!("  GET    /api/v1/version  - Version info");

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop conversations past their inactivity timeout
fn spawn_sweeper(conversations: Arc<ConversationManager>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let removed = conversations.remove_expired();
            if removed > 0 {
                info!(removed, "Expired conversations removed");
            }
        }
    });
}
