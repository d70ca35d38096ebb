//! Deterministic placeholder capabilities for local development and tests

use std::fmt::Write as _;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::domain::workflow::{
    ExtractionRequest, FieldExtractor, FieldType, GenerationRequest, MessageGenerator,
};
use crate::domain::DomainError;

/// Fills every schema field with a fixed sample value and echoes prompts back
#[derive(Debug, Clone, Copy, Default)]
pub struct StubCapabilities;

impl StubCapabilities {
    fn sample(name: &str, field_type: &FieldType) -> Value {
        match field_type {
            FieldType::String => json!(format!("Sample {}", name)),
            FieldType::Number | FieldType::Integer => json!(42),
            FieldType::Boolean => json!(true),
            FieldType::Enum { values } => values.first().map(|v| json!(v)).unwrap_or(Value::Null),
        }
    }
}

#[async_trait]
impl FieldExtractor for StubCapabilities {
    async fn extract(&self, request: ExtractionRequest) -> Result<Map<String, Value>, DomainError> {
        Ok(request
            .schema
            .fields
            .iter()
            .map(|field| (field.name.clone(), Self::sample(&field.name, &field.field_type)))
            .filter(|(_, value)| !value.is_null())
            .collect())
    }
}

#[async_trait]
impl MessageGenerator for StubCapabilities {
    async fn generate(&self, request: GenerationRequest) -> Result<String, DomainError> {
        let mut message = format!("Generated message based on: {}", request.prompt);
        for (name, value) in &request.variables {
            let _ = write!(message, "\n{}: {}", name, value);
        }
        Ok(message)
    }
}
