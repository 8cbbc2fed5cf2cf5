//! Google Gemini (Generative Language API) provider.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{DispensaryError, Result};
use crate::tools::ToolSchema;
use crate::types::{ConversationMessage, Role};

use super::http::{ensure_success, google_headers, sse_data_stream};
use super::{ModelProvider, ProviderSettings, StreamDelta, ToolCallChunk};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: reqwest::Client,
    settings: ProviderSettings,
    function_declarations: Vec<Value>,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, settings: ProviderSettings, tools: &[ToolSchema]) -> Self {
        let function_declarations = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": strip_empty_required(&t.parameters),
                })
            })
            .collect();
        Self {
            client,
            settings,
            function_declarations,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            base.trim_end_matches('/'),
            self.settings.model
        )
    }

    pub(crate) fn build_request_body(&self, messages: &[ConversationMessage]) -> Value {
        let mut body = json!({
            "contents": messages_to_contents(messages),
            "systemInstruction": { "parts": [{ "text": self.settings.system_prompt }] },
        });
        if !self.function_declarations.is_empty() {
            if let Some(obj) = body.as_object_mut() {
                obj.insert(
                    "tools".into(),
                    json!([{ "functionDeclarations": self.function_declarations }]),
                );
                obj.insert(
                    "toolConfig".into(),
                    json!({ "functionCallingConfig": { "mode": "AUTO" } }),
                );
            }
        }
        body
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn provider_name(&self) -> &str {
        "gemini"
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

        debug!(model = %self.settings.model, round, messages = messages.len(), "Gemini stream_round");

        let resp = self
            .client
            .post(self.endpoint())
            .headers(google_headers(&self.settings.api_key))
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let mut data_stream = sse_data_stream(resp);

        let stream = async_stream::stream! {
            let mut calls_seen = 0usize;
            while let Some(data) = data_stream.next().await {
                let data = match data {
                    Ok(d) => d,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                match parse_chunk(&data, round, &mut calls_seen) {
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

/// Decode one stream chunk. Function calls arrive whole, so each becomes a
/// single chunk carrying its full argument JSON and a minted id.
fn parse_chunk(data: &str, round: usize, calls_seen: &mut usize) -> Result<Vec<StreamDelta>> {
    let chunk: GeminiStreamChunk = serde_json::from_str(data)
        .map_err(|e| DispensaryError::Stream(format!("undecodable Gemini chunk: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(DispensaryError::provider("gemini", error.message));
    }

    let mut deltas = Vec::new();
    let parts = chunk
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts);
    for part in parts {
        if part.thought {
            continue;
        }
        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            deltas.push(StreamDelta::Text(text));
        }
        if let Some(call) = part.function_call {
            if call.name.is_empty() {
                continue;
            }
            let index = *calls_seen;
            *calls_seen += 1;
            let args = match call.args {
                Some(Value::Object(map)) => Value::Object(map),
                _ => json!({}),
            };
            deltas.push(StreamDelta::ToolCall(ToolCallChunk {
                index,
                id: Some(format!("gemini-{}-{index}-{round}", call.name)),
                name: Some(call.name),
                arguments: args.to_string(),
            }));
        }
    }
    Ok(deltas)
}

fn messages_to_contents(messages: &[ConversationMessage]) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_responses: Vec<Value> = Vec::new();

    for msg in messages {
        if msg.role != Role::Tool && !pending_responses.is_empty() {
            contents.push(json!({ "role": "function", "parts": std::mem::take(&mut pending_responses) }));
        }
        match msg.role {
            Role::User => contents.push(json!({
                "role": "user",
                "parts": [{ "text": msg.content }],
            })),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !msg.content.is_empty() {
                    parts.push(json!({ "text": msg.content }));
                }
                for call in &msg.tool_calls {
                    parts.push(json!({
                        "functionCall": { "name": call.name, "args": call.arguments }
                    }));
                }
                if parts.is_empty() {
                    parts.push(json!({ "text": "" }));
                }
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            Role::Tool => {
                let response = match msg.tool_result_value() {
                    Value::Object(map) => Value::Object(map),
                    other => json!({ "result": other }),
                };
                pending_responses.push(json!({
                    "functionResponse": {
                        "name": msg.name.clone().unwrap_or_default(),
                        "response": response,
                    }
                }));
            }
        }
    }
    if !pending_responses.is_empty() {
        contents.push(json!({ "role": "function", "parts": pending_responses }));
    }
    contents
}

/// Remove empty `required` arrays, which the Gemini schema dialect rejects.
fn strip_empty_required(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, v)| !(k.as_str() == "required" && v.as_array().is_some_and(Vec::is_empty)))
                .map(|(k, v)| (k.clone(), strip_empty_required(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_empty_required).collect()),
        other => other.clone(),
    }
}

// Gemini stream types (internal)

#[derive(Deserialize)]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiError {
    message: String,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    #[serde(default)]
    name: String,
    args: Option<Value>,
}
