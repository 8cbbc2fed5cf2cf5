//! Round-based tool-calling loop.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::provider::{ModelProvider, StreamDelta};
use crate::tools::ToolRegistry;
use crate::types::ConversationMessage;

use super::accumulator::ToolCallAccumulator;
use super::events::AgentEvent;

/// Unique run identifier, recorded on every log line of a run.
pub type RunId = Uuid;

/// Error message reported when the model keeps requesting tools.
pub fn round_limit_message(max_rounds: usize) -> String {
    format!(
        "Maximum tool call rounds ({max_rounds}) reached. This likely indicates an infinite loop. \
         Please try rephrasing your request or contact support."
    )
}

/// Drives one provider and one tool registry through tool-calling rounds.
///
/// Each call to [`AgentLoop::run`] owns a fresh copy of the conversation;
/// nothing is remembered between runs.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self { provider, tools }
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Run the conversation, yielding events as they become available.
    ///
    /// The stream is lazy: dropping it cancels the in-flight provider request
    /// and any tool call still pending.
    pub fn run(&self, messages: Vec<ConversationMessage>, max_rounds: usize) -> BoxStream<'static, AgentEvent> {
        let provider = Arc::clone(&self.provider);
        let tools = Arc::clone(&self.tools);
        let run_id: RunId = Uuid::new_v4();

        let stream = async_stream::stream! {
            let mut conversation = messages;
            let mut terminated = false;

            for round in 0..max_rounds {
                info!(
                    %run_id,
                    provider = provider.provider_name(),
                    model = provider.model_id(),
                    round,
                    max_rounds,
                    messages = conversation.len(),
                    "Starting round"
                );

                let mut deltas = match provider.stream_round(round, &conversation).await {
                    Ok(deltas) => deltas,
                    Err(e) => {
                        error!(%run_id, round, error = %e, "Provider request failed");
                        yield AgentEvent::error(e.to_string());
                        terminated = true;
                        break;
                    }
                };

                let mut text = String::new();
                let mut accumulator = ToolCallAccumulator::new(round);
                let mut failure = None;
                while let Some(delta) = deltas.next().await {
                    match delta {
                        Ok(StreamDelta::Text(chunk)) => {
                            text.push_str(&chunk);
                            yield AgentEvent::TextDelta { delta: chunk };
                        }
                        Ok(StreamDelta::ToolCall(chunk)) => {
                            if let Some(event) = accumulator.push(chunk) {
                                yield event;
                            }
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                drop(deltas);

                if let Some(e) = failure {
                    error!(%run_id, round, error = %e, "Provider stream failed");
                    yield AgentEvent::error(e.to_string());
                    terminated = true;
                    break;
                }

                let calls = accumulator.finish();
                if calls.is_empty() {
                    info!(%run_id, round, "Run completed");
                    yield AgentEvent::Done;
                    terminated = true;
                    break;
                }

                conversation.push(ConversationMessage::assistant_with_tool_calls(text, calls.clone()));
                for call in calls {
                    yield AgentEvent::ToolCall {
                        name: call.name.clone(),
                        call_id: call.call_id.clone(),
                        arguments: call.arguments.clone(),
                    };
                    let result = tools.invoke(&call.name, &call.arguments).await;
                    conversation.push(ConversationMessage::tool_result(&call, &result));
                    yield AgentEvent::ToolResult {
                        name: call.name,
                        call_id: call.call_id,
                        result,
                    };
                }
            }

            if !terminated {
                warn!(%run_id, max_rounds, "Tool round budget exhausted");
                yield AgentEvent::error(round_limit_message(max_rounds));
            }
        };

        Box::pin(stream)
    }
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .field("tools", &self.tools.len())
            .finish()
    }
}
