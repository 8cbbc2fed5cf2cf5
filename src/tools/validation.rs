//! Validate tool call arguments against JSON Schema before execution.

use std::fmt;

use serde_json::Value;

/// First schema violation found in a set of arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentViolation {
    MissingRequired { field: String },
    WrongType { field: String, expected: String, actual: &'static str },
}

impl fmt::Display for ArgumentViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRequired { field } => write!(f, "missing required argument '{field}'"),
            Self::WrongType { field, expected, actual } => {
                write!(f, "argument '{field}' expected type '{expected}', got {actual}")
            }
        }
    }
}

/// Validate tool arguments against a JSON Schema.
///
/// Top-level only: required field presence, then property types. A `null`
/// is treated as absent, both for required fields and for type checks.
pub fn validate_arguments(
    args: &serde_json::Map<String, Value>,
    schema: &Value,
) -> Result<(), ArgumentViolation> {
    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if args.get(field).map_or(true, Value::is_null) {
                return Err(ArgumentViolation::MissingRequired {
                    field: field.to_string(),
                });
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, value) in args {
            if value.is_null() {
                continue;
            }
            let Some(expected) = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str())
            else {
                continue;
            };
            if !value_matches_type(value, expected) {
                return Err(ArgumentViolation::WrongType {
                    field: key.clone(),
                    expected: expected.to_string(),
                    actual: json_type_name(value),
                });
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn rejects_missing_required_field() {
        let schema = json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"],
        });

        let result = validate_arguments(&obj(json!({})), &schema);

        assert_eq!(
            result,
            Err(ArgumentViolation::MissingRequired { field: "name".into() })
        );
    }

    #[test]
    fn reports_first_absent_required_field() {
        let schema = json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "prescription_id": { "type": "string" },
            },
            "required": ["user_id", "prescription_id"],
        });

        let err = validate_arguments(&obj(json!({ "user_id": "1003" })), &schema).unwrap_err();

        assert_eq!(err.to_string(), "missing required argument 'prescription_id'");
    }

    #[test]
    fn null_required_field_counts_as_missing() {
        let schema = json!({ "properties": {}, "required": ["med_id"] });

        let result = validate_arguments(&obj(json!({ "med_id": null })), &schema);

        assert!(matches!(result, Err(ArgumentViolation::MissingRequired { .. })));
    }

    #[test]
    fn accepts_valid_args_with_all_required_fields() {
        let schema = json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"],
        });

        assert!(validate_arguments(&obj(json!({ "name": "Nurofen" })), &schema).is_ok());
    }

    #[test]
    fn accepts_any_args_when_schema_is_empty_object() {
        assert!(validate_arguments(&obj(json!({ "anything": 42 })), &json!({})).is_ok());
    }

    #[test]
    fn rejects_field_with_wrong_type() {
        let schema = json!({
            "type": "object",
            "properties": { "limit": { "type": "integer" } },
            "required": [],
        });

        let err = validate_arguments(&obj(json!({ "limit": "ten" })), &schema).unwrap_err();

        assert_eq!(
            err.to_string(),
            "argument 'limit' expected type 'integer', got string"
        );
    }

    #[test]
    fn optional_null_skips_type_check() {
        let schema = json!({
            "properties": { "rx_required": { "type": "boolean" } },
            "required": [],
        });

        assert!(validate_arguments(&obj(json!({ "rx_required": null })), &schema).is_ok());
    }

    #[test]
    fn accepts_extra_fields_not_in_schema_properties() {
        let schema = json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": [],
        });

        assert!(validate_arguments(&obj(json!({ "city": "Haifa", "extra": true })), &schema).is_ok());
    }

    #[test]
    fn validates_array_type_correctly() {
        let schema = json!({
            "properties": { "store_ids": { "type": "array" } },
            "required": [],
        });

        assert!(validate_arguments(&obj(json!({ "store_ids": ["A"] })), &schema).is_ok());
        assert!(validate_arguments(&obj(json!({ "store_ids": "A" })), &schema).is_err());
    }
}
