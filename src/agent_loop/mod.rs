//! Provider-agnostic tool-calling loop and its event stream.

pub mod accumulator;
pub mod events;
pub mod runner;

pub use accumulator::ToolCallAccumulator;
pub use events::{AgentEvent, ErrorPayload};
pub use runner::{round_limit_message, AgentLoop, RunId};
