//! External language-model capabilities consumed by workflow nodes

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::schema::GatherSchema;
use crate::domain::DomainError;

/// Input for a structured extraction call
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub node_id: String,
    /// Extraction instruction followed by the list of fields still missing
    pub prompt: String,
    pub schema: GatherSchema,
    /// Rendered conversation so far
    pub transcript: String,
}

/// Input for a free-text generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub node_id: String,
    pub prompt: String,
    pub variables: BTreeMap<String, Value>,
    pub transcript: String,
}

/// Maps a prompt and field schema to extracted field values
#[async_trait]
pub trait FieldExtractor: Send + Sync + Debug {
    async fn extract(&self, request: ExtractionRequest) -> Result<Map<String, Value>, DomainError>;
}

/// Produces a message to speak from a generation instruction
#[async_trait]
pub trait MessageGenerator: Send + Sync + Debug {
    async fn generate(&self, request: GenerationRequest) -> Result<String, DomainError>;
}

/// Capabilities injected into the engine
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub extractor: Arc<dyn FieldExtractor>,
    pub generator: Arc<dyn MessageGenerator>,
}

impl Capabilities {
    pub fn new(extractor: Arc<dyn FieldExtractor>, generator: Arc<dyn MessageGenerator>) -> Self {
        Self {
            extractor,
            generator,
        }
    }
}
