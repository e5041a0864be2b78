//! Script descriptor domain types
//!
//! Structure owned by the registry and read (never mutated) by the runner
//! for every execution.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Registry description of how to invoke a script and which limits apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Script location, relative to the registry's script directory
    pub path: String,
    #[serde(default)]
    pub specialist: Option<String>,
    #[serde(default)]
    pub execution: ExecutionSpec,
    #[serde(default)]
    pub security: SecuritySpec,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
}

impl ScriptDescriptor {
    /// Name used in progress messages and logs
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.execution.timeout_ms
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.execution.permissions.contains(&permission)
    }
}

/// Invocation block of a descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSpec {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub args: Vec<ArgumentSpec>,
    /// Wall-clock timeout in milliseconds
    #[serde(rename = "timeout", default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Default for ExecutionSpec {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
            timeout_ms: default_timeout_ms(),
            permissions: Vec::new(),
        }
    }
}

fn default_interpreter() -> String {
    "/bin/bash".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Security block of a descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySpec {
    #[serde(default)]
    pub sandbox: SandboxLevel,
    /// Memory ceiling such as "512MB"
    #[serde(default = "default_max_memory")]
    pub max_memory: String,
}

impl Default for SecuritySpec {
    fn default() -> Self {
        Self {
            sandbox: SandboxLevel::default(),
            max_memory: default_max_memory(),
        }
    }
}

fn default_max_memory() -> String {
    "512MB".to_string()
}

/// Declared positional argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<JsonValue>,
    #[serde(default)]
    pub description: Option<String>,
    /// Closed set of accepted values, if any
    #[serde(default, rename = "enum")]
    pub allowed: Option<Vec<JsonValue>>,
}

/// Declared script output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
}

/// Value types understood by argument validation and output coercion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Unrecognised declared type; accepts anything
    #[serde(other)]
    Any,
}

impl ValueType {
    /// Checks the runtime type of a JSON value against the declared type
    pub fn matches(&self, value: &JsonValue) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
            ValueType::Any => true,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Named sandbox policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxLevel {
    None,
    Minimal,
    #[default]
    Standard,
    Strict,
}

impl std::fmt::Display for SandboxLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SandboxLevel::None => "none",
            SandboxLevel::Minimal => "minimal",
            SandboxLevel::Standard => "standard",
            SandboxLevel::Strict => "strict",
        };
        f.write_str(name)
    }
}

/// Execution permission granted to a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadFile,
    WriteFile,
    Network,
    EnvVars,
    #[serde(other)]
    Unrecognized,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_defaults() {
        let descriptor: ScriptDescriptor =
            serde_json::from_value(json!({ "id": "echo", "path": "tools/echo.sh" })).unwrap();

        assert_eq!(descriptor.execution.interpreter, "/bin/bash");
        assert_eq!(descriptor.timeout_ms(), 30_000);
        assert_eq!(descriptor.security.sandbox, SandboxLevel::Standard);
        assert_eq!(descriptor.security.max_memory, "512MB");
        assert_eq!(descriptor.display_name(), "echo");
    }

    #[test]
    fn test_descriptor_full_parse() {
        let descriptor: ScriptDescriptor = serde_json::from_value(json!({
            "id": "fetch",
            "name": "Fetch data",
            "path": "fetch.sh",
            "execution": {
                "interpreter": "/bin/sh",
                "args": [
                    { "name": "url", "type": "string", "required": true },
                    { "name": "retries", "type": "number", "required": false, "default": 2 },
                    { "name": "mode", "type": "string", "enum": ["fast", "slow"] }
                ],
                "timeout": 1000,
                "permissions": ["network", "env_vars", "teleport"]
            },
            "security": { "sandbox": "strict", "max_memory": "64MB" },
            "outputs": [{ "name": "count", "type": "number" }]
        }))
        .unwrap();

        assert_eq!(descriptor.timeout_ms(), 1000);
        assert_eq!(descriptor.execution.args.len(), 3);
        assert_eq!(descriptor.execution.args[1].default, Some(json!(2)));
        assert!(descriptor.execution.args[2].allowed.is_some());
        assert!(descriptor.has_permission(Permission::Network));
        assert!(descriptor.has_permission(Permission::EnvVars));
        assert!(descriptor.has_permission(Permission::Unrecognized));
        assert_eq!(descriptor.security.sandbox, SandboxLevel::Strict);
        assert_eq!(descriptor.outputs[0].value_type, ValueType::Number);
    }

    #[test]
    fn test_value_type_matches() {
        assert!(ValueType::String.matches(&json!("hi")));
        assert!(!ValueType::String.matches(&json!(1)));
        assert!(ValueType::Number.matches(&json!(1.5)));
        assert!(ValueType::Boolean.matches(&json!(false)));
        assert!(!ValueType::Boolean.matches(&json!("false")));
        assert!(ValueType::Array.matches(&json!([1, 2])));
        assert!(ValueType::Object.matches(&json!({"a": 1})));
        assert!(ValueType::Any.matches(&json!(null)));
    }

    #[test]
    fn test_unknown_value_type_is_any() {
        let spec: OutputSpec =
            serde_json::from_value(json!({ "name": "blob", "type": "binary" })).unwrap();
        assert_eq!(spec.value_type, ValueType::Any);
    }
}
