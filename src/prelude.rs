//! Convenience re-exports for common use.

pub use crate::agent_loop::{AgentEvent, AgentLoop};
pub use crate::config::DispensaryConfig;
pub use crate::dispatch::{Dispatcher, ProviderKind};
pub use crate::error::{DispensaryError, Result};
pub use crate::provider::{ModelProvider, StreamDelta, ToolCallChunk};
pub use crate::store::{MemoryStore, PharmacyStore, UsageRecorder};
pub use crate::tools::{pharmacy_registry, FunctionTool, Tool, ToolArguments, ToolParameters, ToolRegistry};
pub use crate::types::{ConversationMessage, Role, ToolArgs, ToolCallRecord};
