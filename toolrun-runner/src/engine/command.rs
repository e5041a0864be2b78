//! Positional command-line construction

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use toolrun_core::domain::script::ScriptDescriptor;

/// Renders the positional arguments passed after the script path
///
/// Declared order is kept. A missing optional argument falls back to its
/// declared default and is skipped when it has none.
pub fn build_args(
    descriptor: &ScriptDescriptor,
    arguments: &HashMap<String, JsonValue>,
) -> Vec<String> {
    descriptor
        .execution
        .args
        .iter()
        .filter_map(|spec| {
            arguments
                .get(&spec.name)
                .or(spec.default.as_ref().filter(|v| !v.is_null()))
        })
        .map(render_value)
        .collect()
}

/// Strings pass through raw, booleans become `true`/`false`, compound
/// values are compact JSON
pub fn render_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_args_in_declared_order() {
        let descriptor: ScriptDescriptor = serde_json::from_value(json!({
            "id": "t",
            "path": "t.sh",
            "execution": {
                "args": [
                    { "name": "name", "type": "string", "required": true },
                    { "name": "verbose", "type": "boolean" },
                    { "name": "count", "type": "number", "default": 3 },
                    { "name": "skipped", "type": "string" },
                    { "name": "tags", "type": "array" },
                    { "name": "opts", "type": "object" }
                ]
            }
        }))
        .unwrap();

        let arguments: HashMap<String, JsonValue> = serde_json::from_value(json!({
            "opts": { "a": 1 },
            "tags": ["x", "y"],
            "verbose": false,
            "name": "hello world"
        }))
        .unwrap();

        assert_eq!(
            build_args(&descriptor, &arguments),
            vec!["hello world", "false", "3", r#"["x","y"]"#, r#"{"a":1}"#]
        );
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("raw \"text\"")), "raw \"text\"");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!(1.5)), "1.5");
        assert_eq!(render_value(&json!(42)), "42");
    }
}
