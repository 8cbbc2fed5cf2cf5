//! Conversation types replayed to the model on every round.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keyword arguments for a tool call.
pub type ToolArgs = Map<String, Value>;

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    /// Calls requested by the assistant in this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// For tool results: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool results: the tool that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationMessage {
    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create an assistant turn that requested tool calls.
    pub fn assistant_with_tool_calls(text: impl Into<String>, calls: Vec<ToolCallRecord>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::assistant(text)
        }
    }

    /// Synthesize a tool result message for `call`.
    ///
    /// The result is carried as its JSON text so every provider can replay it.
    pub fn tool_result(call: &ToolCallRecord, result: &Value) -> Self {
        Self {
            role: Role::Tool,
            content: result.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call.call_id.clone()),
            name: Some(call.name.clone()),
        }
    }

    /// Build a message from a client-supplied role string.
    ///
    /// Clients may only speak as `user` or `assistant`; anything else is
    /// treated as user content.
    pub fn from_client(role: &str, content: impl Into<String>) -> Self {
        if role.eq_ignore_ascii_case("assistant") {
            Self::assistant(content)
        } else {
            Self::user(content)
        }
    }

    /// The tool result payload, parsed back from its JSON text.
    pub fn tool_result_value(&self) -> Value {
        serde_json::from_str(&self.content).unwrap_or_else(|_| Value::String(self.content.clone()))
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A finalized tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub name: String,
    pub arguments: ToolArgs,
}
