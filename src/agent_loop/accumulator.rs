//! Per-round buffering of streamed tool-call fragments.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::provider::ToolCallChunk;
use crate::types::{ToolArgs, ToolCallRecord};

use super::events::AgentEvent;

#[derive(Debug)]
struct PendingCall {
    call_id: String,
    name: String,
    arguments: String,
}

/// Collects tool-call fragments for one round.
///
/// Fragments are keyed by their chunk index and need not arrive
/// contiguously. A call's id is fixed when the call is first seen: the
/// provider's id if it sent one, otherwise `call-{round}-{index}`.
#[derive(Debug)]
pub struct ToolCallAccumulator {
    round: usize,
    calls: Vec<PendingCall>,
    by_index: HashMap<usize, usize>,
}

impl ToolCallAccumulator {
    pub fn new(round: usize) -> Self {
        Self {
            round,
            calls: Vec::new(),
            by_index: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Absorb a fragment, returning the event that surfaces it.
    ///
    /// Empty argument fragments (such as the header chunk carrying only the
    /// id and name) produce no event.
    pub fn push(&mut self, chunk: ToolCallChunk) -> Option<AgentEvent> {
        let slot = match self.by_index.get(&chunk.index) {
            Some(&slot) => slot,
            None => {
                let call_id = chunk
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call-{}-{}", self.round, chunk.index));
                self.calls.push(PendingCall {
                    call_id,
                    name: String::new(),
                    arguments: String::new(),
                });
                self.by_index.insert(chunk.index, self.calls.len() - 1);
                self.calls.len() - 1
            }
        };

        let call = &mut self.calls[slot];
        if let Some(name) = chunk.name {
            if call.name.is_empty() {
                call.name = name;
            }
        }
        if chunk.arguments.is_empty() {
            return None;
        }
        call.arguments.push_str(&chunk.arguments);
        Some(AgentEvent::ToolArgsDelta {
            call_id: call.call_id.clone(),
            delta: chunk.arguments,
        })
    }

    /// Finalize all calls in first-seen order.
    pub fn finish(self) -> Vec<ToolCallRecord> {
        self.calls
            .into_iter()
            .map(|call| {
                let arguments = parse_arguments(&call.name, &call.arguments);
                ToolCallRecord {
                    call_id: call.call_id,
                    name: call.name,
                    arguments,
                }
            })
            .collect()
    }
}

/// Parse accumulated argument text. Blank text is an empty mapping;
/// malformed or non-object JSON is logged and treated as empty.
fn parse_arguments(tool: &str, raw: &str) -> ToolArgs {
    if raw.trim().is_empty() {
        return ToolArgs::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool, kind = json_kind(&other), "Tool call arguments are not an object; using empty arguments");
            ToolArgs::new()
        }
        Err(e) => {
            warn!(tool, error = %e, "Malformed tool call arguments; using empty arguments");
            ToolArgs::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
