//! Typed access to tool call arguments.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DispensaryError;
use crate::types::ToolArgs;

/// Parsed keyword arguments handed to a tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    raw: ToolArgs,
}

impl ToolArguments {
    pub fn new(raw: ToolArgs) -> Self {
        Self { raw }
    }

    /// Build from any JSON value; non-objects yield no arguments.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(raw) => Self { raw },
            _ => Self::default(),
        }
    }

    pub fn raw(&self) -> &ToolArgs {
        &self.raw
    }

    pub fn get_str(&self, key: &str) -> Result<&str, DispensaryError> {
        self.get_str_opt(key)
            .ok_or_else(|| DispensaryError::InvalidArgument(format!("missing string argument '{key}'")))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(|v| v.as_str())
    }

    /// Deserialize the whole argument map into a typed parameter struct.
    ///
    /// Explicit `null`s are dropped first so optional fields fall back to
    /// their defaults.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, DispensaryError> {
        let cleaned: ToolArgs = self
            .raw
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(cleaned))
            .map_err(|e| DispensaryError::InvalidArgument(e.to_string()))
    }
}
