//! Model provider trait and implementations.
//!
//! An adapter owns one translation boundary: it serializes the running
//! conversation into its backend's wire shape, opens a streaming completion,
//! and forwards what it reads as [`StreamDelta`]s. Argument accumulation and
//! tool execution live in the agent loop, so adapters stay stateless across
//! rounds.

pub mod gemini;
pub mod http;
pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::ConversationMessage;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Connection and prompt settings shared by every adapter.
#[derive(Clone)]
pub struct ProviderSettings {
    pub model: String,
    pub api_key: String,
    /// Overrides the provider's public endpoint.
    pub base_url: Option<String>,
    pub system_prompt: String,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("model", &self.model)
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// A fragment of a tool invocation as seen on the wire.
///
/// Fragments sharing an `index` belong to the same call. `id` and `name`
/// usually arrive on the first fragment only; `arguments` is a piece of JSON
/// text to be concatenated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallChunk {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// One increment of a provider's streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    Text(String),
    ToolCall(ToolCallChunk),
}

/// Core trait implemented by all model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "gemini").
    fn provider_name(&self) -> &str;

    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Open a streaming completion for `messages`, with the tool set attached
    /// and tool choice left to the model.
    ///
    /// `round` is the zero-based round index within the current run.
    async fn stream_round(
        &self,
        round: usize,
        messages: &[ConversationMessage],
    ) -> Result<BoxStream<'static, Result<StreamDelta>>>;
}
