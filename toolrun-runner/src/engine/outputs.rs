//! Extraction of declared outputs from a script's stdout

use serde_json::{Map, Number, Value as JsonValue};
use toolrun_core::domain::script::{OutputSpec, ValueType};

/// Picks the declared outputs out of stdout
///
/// A stdout that is a single JSON object is read directly. Otherwise each
/// `key=value` line naming a declared output is coerced to its type.
/// Undeclared keys are ignored.
pub fn parse_outputs(stdout: &str, declared: &[OutputSpec]) -> Map<String, JsonValue> {
    let stdout = stdout.trim();
    let mut outputs = Map::new();

    if let Ok(JsonValue::Object(object)) = serde_json::from_str::<JsonValue>(stdout) {
        for spec in declared {
            if let Some(value) = object.get(&spec.name) {
                outputs.insert(spec.name.clone(), value.clone());
            }
        }
        return outputs;
    }

    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if let Some(spec) = declared.iter().find(|spec| spec.name == key) {
            outputs.insert(key.to_string(), convert_value(value.trim(), spec.value_type));
        }
    }
    outputs
}

/// Coerces a raw `key=value` value to a declared output type
pub fn convert_value(raw: &str, value_type: ValueType) -> JsonValue {
    match value_type {
        ValueType::Boolean => {
            JsonValue::Bool(matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        }
        ValueType::Number => {
            if let Ok(int) = raw.parse::<i64>() {
                return JsonValue::from(int);
            }
            raw.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(raw.to_string()))
        }
        ValueType::Array => serde_json::from_str(raw).unwrap_or_else(|_| {
            JsonValue::Array(raw.split(',').map(JsonValue::from).collect())
        }),
        ValueType::Object => serde_json::from_str(raw).unwrap_or_else(|_| {
            let mut object = Map::new();
            object.insert("value".to_string(), JsonValue::from(raw));
            JsonValue::Object(object)
        }),
        ValueType::String | ValueType::Any => JsonValue::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs(pairs: &[(&str, ValueType)]) -> Vec<OutputSpec> {
        pairs
            .iter()
            .map(|(name, value_type)| OutputSpec {
                name: name.to_string(),
                value_type: *value_type,
            })
            .collect()
    }

    #[test]
    fn test_json_stdout_picks_declared() {
        let declared = specs(&[("count", ValueType::Number), ("missing", ValueType::String)]);
        let outputs = parse_outputs(r#"{"count": 3, "noise": true}"#, &declared);

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["count"], json!(3));
    }

    #[test]
    fn test_key_value_lines() {
        let declared = specs(&[
            ("ok", ValueType::Boolean),
            ("count", ValueType::Number),
            ("ratio", ValueType::Number),
            ("items", ValueType::Array),
            ("meta", ValueType::Object),
            ("name", ValueType::String),
        ]);
        let stdout = "starting up\nok=yes\ncount=42\nratio=0.5\nitems=a,b\nmeta=plain\nname = demo \nother=1\n";
        let outputs = parse_outputs(stdout, &declared);

        assert_eq!(outputs["ok"], json!(true));
        assert_eq!(outputs["count"], json!(42));
        assert_eq!(outputs["ratio"], json!(0.5));
        assert_eq!(outputs["items"], json!(["a", "b"]));
        assert_eq!(outputs["meta"], json!({ "value": "plain" }));
        assert_eq!(outputs["name"], json!("demo"));
        assert!(!outputs.contains_key("other"));
    }

    #[test]
    fn test_no_declared_outputs_yields_empty_map() {
        assert!(parse_outputs("hello\n", &[]).is_empty());
        assert!(parse_outputs(r#"{"a": 1}"#, &[]).is_empty());
    }

    #[test]
    fn test_convert_value() {
        assert_eq!(convert_value("TRUE", ValueType::Boolean), json!(true));
        assert_eq!(convert_value("no", ValueType::Boolean), json!(false));
        assert_eq!(convert_value("-7", ValueType::Number), json!(-7));
        assert_eq!(convert_value("1e3", ValueType::Number), json!(1000.0));
        assert_eq!(convert_value("many", ValueType::Number), json!("many"));
        assert_eq!(convert_value("[1,2]", ValueType::Array), json!([1, 2]));
        assert_eq!(convert_value(r#"{"k":1}"#, ValueType::Object), json!({ "k": 1 }));
        assert_eq!(convert_value("42", ValueType::String), json!("42"));
    }
}
