//! Text-completion services
//!
//! The chat controller depends only on [`CompletionService`]; the OpenRouter
//! client is the production implementation.

use async_trait::async_trait;

use crate::chat::ChatMessage;
use crate::Result;

mod openrouter;

pub use openrouter::OpenRouterClient;

/// Produces the assistant's next reply for a conversation
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// `system` is sent ahead of `messages`, which are in conversation order.
    ///
    /// Transport failures are `ChatsqlError::TransportError`; a response
    /// without reply text is `ChatsqlError::CompletionError`.
    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String>;
}
