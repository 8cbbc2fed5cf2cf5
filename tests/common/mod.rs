//! Shared test helpers: a scripted provider and a seeded tool registry.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use dispensary::agent_loop::AgentEvent;
use dispensary::error::{DispensaryError, Result};
use dispensary::provider::{ModelProvider, StreamDelta, ToolCallChunk};
use dispensary::store::MemoryStore;
use dispensary::tools::{pharmacy_registry, ToolRegistry};
use dispensary::types::ConversationMessage;

/// What the scripted provider does on one round.
#[derive(Debug, Clone)]
pub enum Round {
    /// Stream these deltas, then end normally.
    Stream(Vec<StreamDelta>),
    /// Fail before any delta is produced.
    FailToOpen(String),
    /// Stream these deltas, then fail.
    FailAfter(Vec<StreamDelta>, String),
}

/// A provider that replays canned rounds.
pub struct ScriptedProvider {
    rounds: Vec<Round>,
    repeat_last: bool,
    seen: Mutex<Vec<Vec<ConversationMessage>>>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds,
            repeat_last: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Replay `round` on every call, forever.
    pub fn always(round: Round) -> Self {
        Self {
            rounds: vec![round],
            repeat_last: true,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Conversations received, one per round.
    pub fn seen(&self) -> Vec<Vec<ConversationMessage>> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-1"
    }

    async fn stream_round(
        &self,
        _round: usize,
        messages: &[ConversationMessage],
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        let call = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(messages.to_vec());
            seen.len() - 1
        };
        let round = if self.repeat_last {
            self.rounds.last().cloned()
        } else {
            self.rounds.get(call).cloned()
        };

        match round.unwrap_or_else(|| Round::Stream(vec![text("(script exhausted)")])) {
            Round::Stream(deltas) => Ok(futures::stream::iter(deltas.into_iter().map(Ok)).boxed()),
            Round::FailToOpen(message) => Err(DispensaryError::provider("scripted", message)),
            Round::FailAfter(deltas, message) => {
                let items = deltas
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(DispensaryError::Stream(message))));
                Ok(futures::stream::iter(items).boxed())
            }
        }
    }
}

pub fn text(s: &str) -> StreamDelta {
    StreamDelta::Text(s.to_string())
}

/// A tool call split the way OpenAI streams it: a header chunk with id and
/// name, then the argument JSON in two fragments.
pub fn tool_call(index: usize, id: Option<&str>, name: &str, arguments: &str) -> Vec<StreamDelta> {
    let mid = arguments
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= arguments.len() / 2)
        .unwrap_or(arguments.len());
    let (head, tail) = arguments.split_at(mid);
    let mut deltas = vec![StreamDelta::ToolCall(ToolCallChunk {
        index,
        id: id.map(String::from),
        name: Some(name.to_string()),
        arguments: String::new(),
    })];
    for fragment in [head, tail] {
        if !fragment.is_empty() {
            deltas.push(StreamDelta::ToolCall(ToolCallChunk {
                index,
                id: None,
                name: None,
                arguments: fragment.to_string(),
            }));
        }
    }
    deltas
}

/// Registry of the pharmacy tools over the bundled seed data.
pub fn seeded_registry() -> (Arc<ToolRegistry>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::bundled().expect("bundled seed parses"));
    let registry = pharmacy_registry(store.clone(), store.clone());
    (Arc::new(registry), store)
}

pub async fn collect(stream: BoxStream<'static, AgentEvent>) -> Vec<AgentEvent> {
    stream.collect().await
}

/// Assert the sequence ends with exactly one terminal event.
pub fn assert_single_terminal(events: &[AgentEvent]) {
    let terminals: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminals, vec![events.len() - 1], "events: {events:#?}");
}

/// Compact event kinds, for order assertions.
pub fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            AgentEvent::TextDelta { .. } => "text",
            AgentEvent::ToolArgsDelta { .. } => "args",
            AgentEvent::ToolCall { .. } => "call",
            AgentEvent::ToolResult { .. } => "result",
            AgentEvent::Done => "done",
            AgentEvent::Error { .. } => "error",
        })
        .collect()
}
