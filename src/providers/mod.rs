pub mod openai;

use crate::error::UpstreamError;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;

/// Upstream chat-completion service
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Model requests are sent to
    fn model(&self) -> &str;

    /// Chat completion (non-streaming)
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, UpstreamError>;
}
