use tw_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single-turn chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub content: String,
    /// The model that actually produced the response.
    pub model: String,
    /// The reason the model stopped generating (e.g. "stop", "length").
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core model trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every chat-completion adapter must implement.
///
/// Calls may be slow and may fail; timeouts are the adapter's own
/// (configured per client), not the caller's.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one user prompt and wait for the full response.
    async fn chat(&self, prompt: &str) -> Result<ChatResponse>;

    /// Just the text of [`chat`](Self::chat).
    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(self.chat(prompt).await?.content)
    }

    /// The model identifier requests are sent with.
    fn model_id(&self) -> &str;
}
