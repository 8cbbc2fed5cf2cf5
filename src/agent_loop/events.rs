//! Canonical run events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ToolArgs;

/// Events emitted by the agent loop, independent of the model provider.
///
/// Every run ends with exactly one terminal event ([`AgentEvent::Done`] or
/// [`AgentEvent::Error`]) and nothing follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant text as it streams in.
    TextDelta { delta: String },
    /// A fragment of a tool call's argument JSON.
    ToolArgsDelta {
        #[serde(rename = "item_id")]
        call_id: String,
        delta: String,
    },
    /// A finalized tool call, about to be executed.
    ToolCall {
        name: String,
        call_id: String,
        arguments: ToolArgs,
    },
    /// The payload a tool returned.
    ToolResult {
        name: String,
        call_id: String,
        result: Value,
    },
    Done,
    Error { error: ErrorPayload },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl AgentEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorPayload {
                message: message.into(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// The call id this event refers to, if any.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolArgsDelta { call_id, .. }
            | Self::ToolCall { call_id, .. }
            | Self::ToolResult { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Serialize as a single `data:` frame payload.
    pub fn to_json(&self) -> String {
        const FALLBACK: &str = r#"{"type":"error","error":{"message":"unserializable event"}}"#;
        serde_json::to_string(self).unwrap_or_else(|_| FALLBACK.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shapes() {
        let mut args = ToolArgs::new();
        args.insert("med_id".into(), json!("MED001"));

        let cases = [
            (AgentEvent::TextDelta { delta: "Hi".into() }, json!({"type": "text_delta", "delta": "Hi"})),
            (
                AgentEvent::ToolArgsDelta {
                    call_id: "call_1".into(),
                    delta: "{\"med".into(),
                },
                json!({"type": "tool_args_delta", "item_id": "call_1", "delta": "{\"med"}),
            ),
            (
                AgentEvent::ToolCall {
                    name: "check_stock_availability".into(),
                    call_id: "call_1".into(),
                    arguments: args,
                },
                json!({"type": "tool_call", "name": "check_stock_availability", "call_id": "call_1", "arguments": {"med_id": "MED001"}}),
            ),
            (
                AgentEvent::ToolResult {
                    name: "list_stores".into(),
                    call_id: "call_2".into(),
                    result: json!({"count": 0}),
                },
                json!({"type": "tool_result", "name": "list_stores", "call_id": "call_2", "result": {"count": 0}}),
            ),
            (AgentEvent::Done, json!({"type": "done"})),
            (AgentEvent::error("boom"), json!({"type": "error", "error": {"message": "boom"}})),
        ];

        for (event, expected) in cases {
            assert_eq!(serde_json::to_value(&event).unwrap(), expected);
        }
    }

    #[test]
    fn terminal_events() {
        assert!(AgentEvent::Done.is_terminal());
        assert!(AgentEvent::error("x").is_terminal());
        assert!(!AgentEvent::TextDelta { delta: String::new() }.is_terminal());
    }
}
