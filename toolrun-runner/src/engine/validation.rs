//! Argument validation against a script's declared arguments

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;
use toolrun_core::domain::script::{ScriptDescriptor, ValueType};

/// Why a set of arguments was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArgumentError {
    #[error("Missing required argument: {name}")]
    Missing { name: String },

    #[error("Invalid type for {name}: expected {expected}")]
    InvalidType { name: String, expected: ValueType },

    #[error("Invalid value for {name}: must be one of {allowed}")]
    NotAllowed { name: String, allowed: String },

    #[error("Unknown arguments: {}", .names.join(", "))]
    Unknown { names: Vec<String> },
}

impl ArgumentError {
    /// Names of the offending arguments
    pub fn arguments(&self) -> Vec<&str> {
        match self {
            ArgumentError::Missing { name }
            | ArgumentError::InvalidType { name, .. }
            | ArgumentError::NotAllowed { name, .. } => vec![name.as_str()],
            ArgumentError::Unknown { names } => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Checks `arguments` against the descriptor's argument declarations
///
/// Declarations are checked in order (presence, type, allowed values), then
/// any undeclared names are rejected together.
pub fn validate_arguments(
    descriptor: &ScriptDescriptor,
    arguments: &HashMap<String, JsonValue>,
) -> Result<(), ArgumentError> {
    let declared = &descriptor.execution.args;

    for spec in declared {
        let Some(value) = arguments.get(&spec.name) else {
            if spec.required {
                return Err(ArgumentError::Missing {
                    name: spec.name.clone(),
                });
            }
            continue;
        };

        if !spec.value_type.matches(value) {
            return Err(ArgumentError::InvalidType {
                name: spec.name.clone(),
                expected: spec.value_type,
            });
        }

        if let Some(allowed) = &spec.allowed {
            if !allowed.contains(value) {
                return Err(ArgumentError::NotAllowed {
                    name: spec.name.clone(),
                    allowed: JsonValue::Array(allowed.clone()).to_string(),
                });
            }
        }
    }

    let mut unknown: Vec<String> = arguments
        .keys()
        .filter(|name| !declared.iter().any(|spec| &spec.name == *name))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(ArgumentError::Unknown { names: unknown });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> ScriptDescriptor {
        serde_json::from_value(json!({
            "id": "fetch",
            "path": "fetch.sh",
            "execution": {
                "args": [
                    { "name": "url", "type": "string", "required": true },
                    { "name": "limit", "type": "number" },
                    { "name": "mode", "type": "string", "enum": ["fast", "slow"] },
                    { "name": "extra", "type": "blob" }
                ]
            }
        }))
        .unwrap()
    }

    fn args(value: JsonValue) -> HashMap<String, JsonValue> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_valid_arguments() {
        let d = descriptor();
        assert!(validate_arguments(&d, &args(json!({ "url": "http://x" }))).is_ok());
        assert!(
            validate_arguments(
                &d,
                &args(json!({ "url": "http://x", "limit": 5, "mode": "slow", "extra": [1] }))
            )
            .is_ok()
        );
    }

    #[test]
    fn test_missing_required() {
        let err = validate_arguments(&descriptor(), &HashMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: url");
        assert_eq!(err.arguments(), vec!["url"]);
    }

    #[test]
    fn test_invalid_type() {
        let err = validate_arguments(&descriptor(), &args(json!({ "url": "x", "limit": "5" })))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid type for limit: expected number");
    }

    #[test]
    fn test_value_outside_enum() {
        let err = validate_arguments(&descriptor(), &args(json!({ "url": "x", "mode": "warp" })))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Invalid value for mode: must be one of ["fast","slow"]"#
        );
    }

    #[test]
    fn test_unknown_arguments_sorted() {
        let err = validate_arguments(
            &descriptor(),
            &args(json!({ "url": "x", "zeta": 1, "alpha": 2 })),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Unknown arguments: alpha, zeta");
        assert_eq!(err.arguments(), vec!["alpha", "zeta"]);
    }
}
