//! Name-addressed tool registry with structured failure payloads.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::arguments::ToolArguments;
use super::tool::Tool;
use super::types::ToolSchema;
use super::validation::{validate_arguments, ArgumentViolation};
use crate::error::DispensaryError;
use crate::store::UsageRecorder;
use crate::types::ToolArgs;

/// Fixed set of tools the model may call.
///
/// [`invoke`](Self::invoke) never fails: unknown tools, bad arguments and
/// tool errors all come back as a JSON object with an `error` marker so the
/// model can react to them on its next round.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
    usage: Arc<dyn UsageRecorder>,
}

impl ToolRegistry {
    pub fn new(usage: Arc<dyn UsageRecorder>) -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
            usage,
        }
    }

    /// Add a tool. A tool with the same name replaces the earlier one in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.by_name.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn usage(&self) -> &Arc<dyn UsageRecorder> {
        &self.usage
    }

    /// Tool declarations in registration order.
    pub fn describe(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters().schema.clone(),
            })
            .collect()
    }

    /// Run `name` with `args` and return its result payload.
    pub async fn invoke(&self, name: &str, args: &ToolArgs) -> Value {
        let Some(tool) = self.by_name.get(name).map(|&i| &self.tools[i]) else {
            warn!(tool = name, "model requested unknown tool");
            return json!({ "error": "UNKNOWN_TOOL", "tool": name });
        };

        self.usage.record(name);

        if let Err(violation) = validate_arguments(args, &tool.parameters().schema) {
            debug!(tool = name, %violation, "rejecting tool arguments");
            let code = match violation {
                ArgumentViolation::MissingRequired { .. } => "MISSING_REQUIRED_ARGUMENT",
                ArgumentViolation::WrongType { .. } => "INVALID_ARGUMENT",
            };
            return json!({
                "error": code,
                "message": format!("{name}() {violation}"),
                "tool": name,
            });
        }

        debug!(tool = name, "executing tool");
        match tool.execute(&ToolArguments::new(args.clone())).await {
            Ok(result) => result,
            Err(DispensaryError::InvalidArgument(message)) => json!({
                "error": "INVALID_ARGUMENT",
                "message": message,
                "tool": name,
            }),
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                json!({
                    "error": "TOOL_EXECUTION_FAILED",
                    "message": e.to_string(),
                    "tool": name,
                })
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}
