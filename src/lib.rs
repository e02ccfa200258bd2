/*!
# chatsql - Conversational SQL Analytics

chatsql turns a conversation into SQL and SQL results into chart-ready series.

A question such as "what is the revenue by region?" is forwarded to a text-completion
service that has been primed with a small reply protocol:

```text
Revenue per region, highest first.
---SQL---
SELECT region, SUM(amount) AS revenue FROM sales GROUP BY region ORDER BY revenue DESC
---END SQL---
---CHART---
bar
---END CHART---
```

## Architecture

- **Protocol** ([`protocol`]) - system instruction and parser for the delimited reply
- **Execution** ([`execute`]) - sanitizes and runs the statement through a pluggable reader,
  timing it and recording an audit entry
- **Readers** ([`reader`]) - DuckDB and SQLite backends returning ordered row objects
- **Visualization** ([`visualization`]) - shapes rows into labels + datasets for a chart kind
- **Writers** ([`writer`]) - render visualizations (Vega-Lite)
- **Chat** ([`chat`]) - the per-turn controller tying everything together

## Core Components

- [`chart`] - chart kinds and the metric classifier
- [`completion`] - text-completion clients
- [`store`] - chat sessions and the query audit log
- [`audit`] - fire-and-forget audit writer
*/

pub mod audit;
pub mod chart;
pub mod chat;
pub mod completion;
pub mod config;
pub mod execute;
pub mod protocol;
pub mod reader;
pub mod row;
pub mod session;
pub mod store;
pub mod visualization;

#[cfg(feature = "vegalite")]
pub mod writer;

use std::time::Duration;

// Re-export key types for convenience
pub use chart::{classify, ChartKind};
pub use chat::{ChatController, ChatMessage, Conversation, Role, TurnOutcome};
pub use execute::{QueryExecutor, QueryMetadata, QueryResult, QuerySource};
pub use protocol::{parse, ParsedResponse};
pub use row::Row;
pub use visualization::{to_visualization, Visualization};

/// Main library error type
#[derive(thiserror::Error, Debug)]
pub enum ChatsqlError {
    /// The backend rejected the statement (syntax or runtime error)
    #[error("Query error: {0}")]
    ReaderError(String),

    /// The backend or a remote service could not be reached
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Completion error: {0}")]
    CompletionError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Column '{column}' not found in query result. Available columns: {available}")]
    MissingColumn { column: String, available: String },

    #[error("Operation timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Output generation error: {0}")]
    WriterError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ChatsqlError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
