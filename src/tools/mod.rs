//! Tool system for function calling.

pub mod arguments;
pub mod pharmacy;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use pharmacy::{pharmacy_registry, pharmacy_tools};
pub use registry::ToolRegistry;
pub use tool::{FunctionTool, Tool};
pub use types::{ParameterBuilder, ToolParameters, ToolSchema};
pub use validation::{validate_arguments, ArgumentViolation};
