//! Field schemas describing what a Gather node extracts

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Primitive or enumerated type of a gathered field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Enum { values: Vec<String> },
}

impl FieldType {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Enum { .. } => "enum",
        }
    }

    /// Whether `value` is an acceptable instance of this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Enum { values } => value
                .as_str()
                .is_some_and(|s| values.iter().any(|v| v == s)),
        }
    }

    fn json_schema(&self, nullable: bool) -> Value {
        let base = match self {
            Self::Enum { .. } => "string",
            other => other.type_name(),
        };

        let mut schema = if nullable {
            json!({ "type": [base, "null"] })
        } else {
            json!({ "type": base })
        };

        if let Self::Enum { values } = self {
            let mut allowed: Vec<Value> = values.iter().map(|v| json!(v)).collect();
            if nullable {
                allowed.push(Value::Null);
            }
            schema["enum"] = Value::Array(allowed);
        }

        schema
    }
}

/// A named field within a gather schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(flatten)]
    pub field_type: FieldType,

    /// Optional fields are never reported as missing
    #[serde(default)]
    pub required: bool,
}

impl SchemaField {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Structured-data description for a Gather node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatherSchema {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub fields: Vec<SchemaField>,
}

impl GatherSchema {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: SchemaField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Required fields without a value in `collected`, in schema order
    pub fn missing_required<'a>(&'a self, collected: &Map<String, Value>) -> Vec<&'a SchemaField> {
        self.required_fields()
            .filter(|f| collected.get(&f.name).is_none_or(Value::is_null))
            .collect()
    }

    /// Keep only values for known fields that type-check
    pub fn retain_valid(&self, extracted: Map<String, Value>) -> Map<String, Value> {
        extracted
            .into_iter()
            .filter(|(name, value)| {
                self.field(name)
                    .is_some_and(|f| !value.is_null() && f.field_type.accepts(value))
            })
            .collect()
    }

    /// Render as a strict JSON Schema object; optional fields become nullable
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();

        for field in &self.fields {
            let mut property = field.field_type.json_schema(!field.required);
            if !field.description.is_empty() {
                property["description"] = json!(field.description);
            }
            properties.insert(field.name.clone(), property);
        }

        let required: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        });

        if !self.description.is_empty() {
            schema["description"] = json!(self.description);
        }

        schema
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.fields.is_empty() {
            return Err("gather schema must declare at least one field".to_string());
        }

        let mut seen = HashSet::new();

        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err("gather schema field names cannot be empty".to_string());
            }

            if !seen.insert(field.name.as_str()) {
                return Err(format!("duplicate gather schema field '{}'", field.name));
            }

            if let FieldType::Enum { values } = &field.field_type {
                if values.is_empty() {
                    return Err(format!("enum field '{}' must list at least one value", field.name));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_schema() -> GatherSchema {
        GatherSchema::new("User profile")
            .with_field(SchemaField::required("name", FieldType::String).with_description("Full name"))
            .with_field(SchemaField::optional("age", FieldType::Integer))
            .with_field(SchemaField::required("email", FieldType::String))
    }

    #[test]
    fn test_missing_required_ignores_optional() {
        let schema = profile_schema();
        let missing: Vec<&str> = schema
            .missing_required(&Map::new())
            .iter()
            .map(|f| f.name.as_str())
            .collect();

        assert_eq!(missing, vec!["name", "email"]);
    }

    #[test]
    fn test_missing_required_treats_null_as_missing() {
        let schema = profile_schema();
        let mut collected = Map::new();
        collected.insert("name".to_string(), Value::Null);
        collected.insert("email".to_string(), json!("ada@example.com"));

        let missing = schema.missing_required(&collected);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "name");
    }

    #[test]
    fn test_field_type_accepts() {
        assert!(FieldType::Integer.accepts(&json!(42)));
        assert!(FieldType::Integer.accepts(&json!(42.0)));
        assert!(!FieldType::Integer.accepts(&json!(4.2)));
        assert!(FieldType::Number.accepts(&json!(4.2)));
        assert!(!FieldType::Boolean.accepts(&json!("true")));

        let plan = FieldType::Enum {
            values: vec!["basic".to_string(), "pro".to_string()],
        };
        assert!(plan.accepts(&json!("pro")));
        assert!(!plan.accepts(&json!("enterprise")));
    }

    #[test]
    fn test_retain_valid_drops_unknown_and_mistyped() {
        let schema = profile_schema();
        let mut extracted = Map::new();
        extracted.insert("name".to_string(), json!("Ada"));
        extracted.insert("age".to_string(), json!("thirty"));
        extracted.insert("shoe_size".to_string(), json!(9));
        extracted.insert("email".to_string(), Value::Null);

        let kept = schema.retain_valid(extracted);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.get("name"), Some(&json!("Ada")));
    }

    #[test]
    fn test_json_schema_marks_optional_nullable() {
        let schema = profile_schema().to_json_schema();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["name"]["type"], "string");
        assert_eq!(schema["properties"]["name"]["description"], "Full name");
        assert_eq!(schema["properties"]["age"]["type"], json!(["integer", "null"]));
        assert_eq!(schema["required"], json!(["name", "age", "email"]));
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn test_validate() {
        assert!(profile_schema().validate().is_ok());
        assert!(GatherSchema::default().validate().is_err());

        let duplicate = GatherSchema::default()
            .with_field(SchemaField::required("name", FieldType::String))
            .with_field(SchemaField::optional("name", FieldType::String));
        assert!(duplicate.validate().unwrap_err().contains("duplicate"));

        let empty_enum = GatherSchema::default()
            .with_field(SchemaField::required("plan", FieldType::Enum { values: vec![] }));
        assert!(empty_enum.validate().is_err());
    }

    #[test]
    fn test_field_serialization() {
        let field = SchemaField::required(
            "plan",
            FieldType::Enum {
                values: vec!["basic".to_string()],
            },
        );
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(
            json,
            json!({"name": "plan", "type": "enum", "values": ["basic"], "required": true})
        );

        let parsed: SchemaField =
            serde_json::from_value(json!({"name": "age", "type": "integer"})).unwrap();
        assert_eq!(parsed.field_type, FieldType::Integer);
        assert!(!parsed.required);
    }
}
