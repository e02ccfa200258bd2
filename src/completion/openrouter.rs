//! OpenRouter (OpenAI-compatible) chat-completions client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::CompletionService;
use crate::chat::ChatMessage;
use crate::config::CompletionSettings;
use crate::{ChatsqlError, Result};

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    settings: CompletionSettings,
}

impl OpenRouterClient {
    pub fn new(settings: CompletionSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Request body: the system instruction followed by the conversation
    pub fn build_payload(&self, system: &str, messages: &[ChatMessage]) -> Value {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(WireMessage {
            role: "system",
            content: system,
        });
        wire.extend(messages.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        json!({
            "model": self.settings.model,
            "messages": wire,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        })
    }
}

/// Reply text of the first choice
fn extract_reply(body: &str) -> Result<String> {
    let parsed: CompletionResponse = serde_json::from_str(body).map_err(|e| {
        ChatsqlError::CompletionError(format!("Invalid response format from AI API: {}", e))
    })?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            ChatsqlError::CompletionError("Invalid response format from AI API".to_string())
        })
}

#[async_trait]
impl CompletionService for OpenRouterClient {
    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String> {
        if self.settings.api_key.is_empty() {
            return Err(ChatsqlError::CompletionError(
                "No API key configured (set OPENROUTER_API_KEY)".to_string(),
            ));
        }

        let payload = self.build_payload(system, messages);
        tracing::debug!(
            model = %self.settings.model,
            messages = messages.len(),
            "Sending completion request"
        );

        let resp = self
            .http
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .header("HTTP-Referer", &self.settings.referer)
            .header("X-Title", &self.settings.title)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChatsqlError::TransportError(format!("AI API request failed: {}", e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ChatsqlError::TransportError(format!("Failed to read AI API response: {}", e)))?;

        if !status.is_success() {
            let truncated: String = body.chars().take(300).collect();
            return Err(ChatsqlError::TransportError(format!(
                "AI API request failed: {} - {}",
                status, truncated
            )));
        }

        let reply = extract_reply(&body)?;
        tracing::debug!(chars = reply.len(), "Completion received");
        Ok(reply)
    }
}
