//! OpenAI Chat Completions API provider.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{DispensaryError, Result};
use crate::tools::ToolSchema;
use crate::types::{ConversationMessage, Role};

use super::http::{bearer_headers, ensure_success, sse_data_stream};
use super::{ModelProvider, ProviderSettings, StreamDelta, ToolCallChunk};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: reqwest::Client,
    settings: ProviderSettings,
    tools: Vec<Value>,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, settings: ProviderSettings, tools: &[ToolSchema]) -> Self {
        let tools = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        Self {
            client,
            settings,
            tools,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    pub(crate) fn build_request_body(&self, messages: &[ConversationMessage]) -> Value {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(json!({ "role": "system", "content": self.settings.system_prompt }));
        wire.extend(messages.iter().map(message_to_openai));

        let mut body = json!({
            "model": self.settings.model,
            "messages": wire,
            "stream": true,
        });
        if !self.tools.is_empty() {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("tools".into(), Value::Array(self.tools.clone()));
                obj.insert("tool_choice".into(), "auto".into());
            }
        }
        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.settings.model
    }

    async fn stream_round(
        &self,
        round: usize,
        messages: &[ConversationMessage],
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        let body = self.build_request_body(messages);

        debug!(model = %self.settings.model, round, messages = messages.len(), "OpenAI stream_round");

        let resp = self
            .client
            .post(self.endpoint())
            .headers(bearer_headers(&self.settings.api_key))
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let mut data_stream = sse_data_stream(resp);

        let stream = async_stream::stream! {
            while let Some(data) = data_stream.next().await {
                let data = match data {
                    Ok(d) => d,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                match parse_chunk(&data) {
                    Ok(deltas) => {
                        for delta in deltas {
                            yield Ok(delta);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Decode one stream chunk into deltas.
fn parse_chunk(data: &str) -> Result<Vec<StreamDelta>> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data)
        .map_err(|e| DispensaryError::Stream(format!("undecodable OpenAI chunk: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(DispensaryError::provider("openai", error.message));
    }

    let mut deltas = Vec::new();
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(deltas);
    };
    if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
        deltas.push(StreamDelta::Text(text));
    }
    for call in choice.delta.tool_calls.unwrap_or_default() {
        let (name, arguments) = match call.function {
            Some(f) => (f.name, f.arguments.unwrap_or_default()),
            None => (None, String::new()),
        };
        deltas.push(StreamDelta::ToolCall(ToolCallChunk {
            index: call.index,
            id: call.id.filter(|id| !id.is_empty()),
            name: name.filter(|n| !n.is_empty()),
            arguments,
        }));
    }
    Ok(deltas)
}

fn message_to_openai(msg: &ConversationMessage) -> Value {
    match msg.role {
        Role::User => json!({ "role": "user", "content": msg.content }),
        Role::Assistant if msg.tool_calls.is_empty() => {
            json!({ "role": "assistant", "content": msg.content })
        }
        Role::Assistant => {
            let tool_calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.call_id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": Value::Object(tc.arguments.clone()).to_string(),
                        }
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": if msg.content.is_empty() { Value::Null } else { Value::String(msg.content.clone()) },
                "tool_calls": tool_calls,
            })
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        }),
    }
}

// OpenAI API stream types (internal)

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    error: Option<OpenAiError>,
}

#[derive(Deserialize)]
struct OpenAiError {
    message: String,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
}

#[derive(Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Deserialize)]
struct OpenAiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolArgs, ToolCallRecord};

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(
            reqwest::Client::new(),
            ProviderSettings {
                model: "gpt-5".into(),
                api_key: "sk-test".into(),
                base_url: None,
                system_prompt: "You are a pharmacist.".into(),
            },
            &[ToolSchema {
                name: "list_stores".into(),
                description: "List stores".into(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
        )
    }

    #[test]
    fn request_body_prepends_system_prompt_and_tools() {
        let body = provider().build_request_body(&[ConversationMessage::user("hi")]);

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You are a pharmacist.");
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "list_stores");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn tool_turns_map_to_assistant_and_tool_roles() {
        let mut args = ToolArgs::new();
        args.insert("city".into(), json!("Haifa"));
        let call = ToolCallRecord {
            call_id: "call_1".into(),
            name: "list_stores".into(),
            arguments: args,
        };
        let assistant = message_to_openai(&ConversationMessage::assistant_with_tool_calls("", vec![call.clone()]));
        let tool = message_to_openai(&ConversationMessage::tool_result(&call, &json!({"count": 1})));

        assert_eq!(assistant["content"], Value::Null);
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], r#"{"city":"Haifa"}"#);
        assert_eq!(tool, json!({"role": "tool", "tool_call_id": "call_1", "content": r#"{"count":1}"#}));
    }

    #[test]
    fn chunk_with_text_and_tool_fragment() {
        let deltas = parse_chunk(
            r#"{"choices":[{"delta":{"content":"Hi","tool_calls":[{"index":0,"id":"call_1","function":{"name":"list_stores","arguments":""}}]}}]}"#,
        )
        .unwrap();

        assert_eq!(
            deltas,
            vec![
                StreamDelta::Text("Hi".into()),
                StreamDelta::ToolCall(ToolCallChunk {
                    index: 0,
                    id: Some("call_1".into()),
                    name: Some("list_stores".into()),
                    arguments: String::new(),
                }),
            ]
        );
    }

    #[test]
    fn in_band_error_fails_the_stream() {
        let err = parse_chunk(r#"{"error":{"message":"overloaded"}}"#).unwrap_err();
        assert_eq!(err.to_string(), "Provider error: openai: overloaded");
    }

    #[test]
    fn empty_choices_yield_nothing() {
        assert!(parse_chunk(r#"{"choices":[],"usage":{"total_tokens":3}}"#).unwrap().is_empty());
    }
}
