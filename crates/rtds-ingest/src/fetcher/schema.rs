//! Per-dataset-type config schemas
//!
//! Dataset configs arrive as free-form JSON maps. Each registered dataset
//! type declares the keys it accepts so a typo or a wrongly typed value is
//! rejected before any request reaches the provider.

use serde_json::{Map, Value};

use crate::error::{IngestError, Result};

/// Accepted value type of a config field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
}

impl FieldKind {
    pub fn as_str(&self) -> &str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
        }
    }
}

/// One declared config key
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: String,
}

/// Declared config keys for one dataset type
#[derive(Debug, Clone, Default)]
pub struct ConfigSchema {
    fields: Vec<FieldSpec>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a key the caller must supply
    pub fn required(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
            description: description.to_string(),
        });
        self
    }

    /// Declare an optional key, filled with `default` when absent
    pub fn optional(
        mut self,
        name: &str,
        kind: FieldKind,
        default: Option<Value>,
        description: &str,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
            default,
            description: description.to_string(),
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Check `config` against the schema and return it with defaults applied
    pub fn validate(&self, config: &Map<String, Value>) -> Result<Map<String, Value>> {
        if let Some(unknown) = config
            .keys()
            .find(|key| !self.fields.iter().any(|f| &f.name == *key))
        {
            let accepted: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
            return Err(IngestError::InvalidConfig(format!(
                "unknown key '{}' (accepted: {})",
                unknown,
                accepted.join(", ")
            )));
        }

        let mut validated = Map::new();
        for field in &self.fields {
            match config.get(&field.name) {
                Some(Value::Null) | None => {
                    if field.required {
                        return Err(IngestError::InvalidConfig(format!(
                            "missing required key '{}'",
                            field.name
                        )));
                    }
                    if let Some(default) = &field.default {
                        validated.insert(field.name.clone(), default.clone());
                    }
                },
                Some(value) if field.kind.accepts(value) => {
                    validated.insert(field.name.clone(), value.clone());
                },
                Some(value) => {
                    return Err(IngestError::InvalidConfig(format!(
                        "key '{}' must be a {}, got {}",
                        field.name,
                        field.kind.as_str(),
                        value
                    )));
                },
            }
        }

        Ok(validated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .required("dataset", FieldKind::String, "Upstream dataset id")
            .optional("split", FieldKind::String, Some(json!("train")), "Split")
            .optional("page_size", FieldKind::Integer, None, "Rows per request")
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let validated = schema()
            .validate(&config(json!({"dataset": "walledai/AdvBench"})))
            .unwrap();
        assert_eq!(validated["split"], json!("train"));
        assert!(!validated.contains_key("page_size"));
    }

    #[test]
    fn test_rejects_unknown_key() {
        let err = schema()
            .validate(&config(json!({"dataset": "x", "splt": "test"})))
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(msg) if msg.contains("splt")));
    }

    #[test]
    fn test_rejects_wrong_type_and_missing_required() {
        assert!(schema()
            .validate(&config(json!({"dataset": "x", "page_size": "ten"})))
            .is_err());
        assert!(schema().validate(&config(json!({"split": "test"}))).is_err());
    }
}
