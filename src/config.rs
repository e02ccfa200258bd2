//! Runtime settings
//!
//! The binaries map their command-line arguments onto these structs; the
//! library only ever sees the resolved values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::visualization::{ChartStyle, ColumnBinding};
use crate::{ChatsqlError, Result};

pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub completion: CompletionSettings,
    pub chat: ChatSettings,
}

/// Completion service endpoint and sampling options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSettings {
    pub api_url: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Sent as `HTTP-Referer`
    pub referer: String,
    /// Sent as `X-Title`
    pub title: String,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            referer: "https://tree.new".to_string(),
            title: "Tree - Business Intelligence Platform".to_string(),
        }
    }
}

/// Behaviour of the turn controller
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Rows fetched by the table-preview shortcut
    pub preview_limit: usize,
    pub completion_timeout: Option<Duration>,
    pub query_timeout: Option<Duration>,
    pub column_binding: ColumnBinding,
    pub style: ChartStyle,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            preview_limit: 100,
            completion_timeout: None,
            query_timeout: None,
            column_binding: ColumnBinding::Positional,
            style: ChartStyle::default(),
        }
    }
}

impl ChatSettings {
    /// Use CSS colors for generated charts. An empty palette keeps the default.
    pub fn with_colors(mut self, brand: &str, palette: &[String]) -> Result<Self> {
        self.style = ChartStyle::from_css(brand, palette)?;
        Ok(self)
    }

    /// Bind chart columns by name. Both names or neither must be given.
    pub fn with_columns(mut self, label: Option<String>, value: Option<String>) -> Result<Self> {
        self.column_binding = match (label, value) {
            (Some(label), Some(value)) => ColumnBinding::Named { label, value },
            (None, None) => ColumnBinding::Positional,
            _ => {
                return Err(ChatsqlError::ValidationError(
                    "Label and value columns must be given together".to_string(),
                ))
            }
        };
        Ok(self)
    }
}

/// Convert an optional number of seconds, treating 0 as "no limit"
pub fn seconds(value: Option<u64>) -> Option<Duration> {
    value.filter(|s| *s > 0).map(Duration::from_secs)
}
