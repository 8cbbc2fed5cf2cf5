//! Provider selection.

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{info, warn};

use crate::agent_loop::{AgentEvent, AgentLoop};
use crate::config::DispensaryConfig;
use crate::error::Result;
use crate::provider::{http, GeminiProvider, ModelProvider, OpenAiProvider, ProviderSettings};
use crate::tools::{ToolRegistry, ToolSchema};
use crate::types::ConversationMessage;

/// Supported model backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    #[strum(to_string = "gemini", serialize = "google")]
    Gemini,
}

impl ProviderKind {
    /// Parse a configured provider id, falling back to OpenAI when unset or
    /// unrecognized.
    pub fn resolve(value: Option<&str>) -> Self {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Self::default();
        };
        raw.parse().unwrap_or_else(|_| {
            warn!(provider = raw, "Unknown MODEL_PROVIDER; falling back to openai");
            Self::default()
        })
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-5",
            Self::Gemini => "gemini-2.5-flash",
        }
    }
}

/// Build the adapter for the configured backend.
pub fn create_provider(
    config: &DispensaryConfig,
    client: reqwest::Client,
    tools: &[ToolSchema],
) -> Arc<dyn ModelProvider> {
    let settings = ProviderSettings {
        model: config.model.clone(),
        api_key: config.api_key.clone(),
        base_url: config.base_url.clone(),
        system_prompt: config.system_prompt.clone(),
    };
    match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(client, settings, tools)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(client, settings, tools)),
    }
}

/// Entry point for transports: one adapter chosen at startup, one loop per
/// request.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    agent: AgentLoop,
    max_rounds: usize,
}

impl Dispatcher {
    pub fn new(agent: AgentLoop, max_rounds: usize) -> Self {
        Self { agent, max_rounds }
    }

    /// Select the configured provider and wire it to `tools`.
    pub fn from_config(config: &DispensaryConfig, tools: Arc<ToolRegistry>) -> Result<Self> {
        let client = http::build_client(config.request_timeout)?;
        let provider = create_provider(config, client, &tools.describe());
        info!(
            provider = provider.provider_name(),
            model = provider.model_id(),
            tools = tools.len(),
            max_rounds = config.max_tool_rounds,
            "Provider selected"
        );
        Ok(Self::new(AgentLoop::new(provider, tools), config.max_tool_rounds))
    }

    pub fn agent(&self) -> &AgentLoop {
        &self.agent
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn stream(&self, messages: Vec<ConversationMessage>) -> BoxStream<'static, AgentEvent> {
        self.agent.run(messages, self.max_rounds)
    }
}
