//! Extraction and generation capabilities backed by a chat-completion provider

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::workflow::{
    ExtractionRequest, FieldExtractor, GenerationRequest, MessageGenerator,
};
use crate::domain::{DomainError, LlmProvider, LlmRequest, LlmResponse};
use crate::infrastructure::observability::{record_llm_request, LlmRequestMetricParams};

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract structured data from phone call transcripts. \
Only use information the caller actually stated. Use null for anything not mentioned.";

const GENERATION_SYSTEM_PROMPT: &str = "You are a voice assistant speaking on a live phone call. \
Reply with a single short message to be spoken aloud, with no formatting.";

/// Calls the provider and records request metrics
async fn timed_chat(
    provider: &dyn LlmProvider,
    model: &str,
    request: LlmRequest,
) -> Result<LlmResponse, DomainError> {
    let started = Instant::now();
    let result = provider.chat(model, request).await;

    let usage = result.as_ref().ok().and_then(|r| r.usage.as_ref());
    record_llm_request(LlmRequestMetricParams {
        provider: provider.provider_name(),
        model,
        duration: started.elapsed(),
        success: result.is_ok(),
        input_tokens: usage.map(|u| u64::from(u.prompt_tokens)),
        output_tokens: usage.map(|u| u64::from(u.completion_tokens)),
    });

    result
}

/// Structured-output extraction through an LLM
#[derive(Debug, Clone)]
pub struct LlmFieldExtractor {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmFieldExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl FieldExtractor for LlmFieldExtractor {
    async fn extract(&self, request: ExtractionRequest) -> Result<Map<String, Value>, DomainError> {
        let llm_request = LlmRequest::builder()
            .system(EXTRACTION_SYSTEM_PROMPT)
            .user(format!(
                "{}\n\nConversation:\n{}",
                request.prompt, request.transcript
            ))
            .temperature(0.0)
            .json_schema(schema_name(&request.node_id), request.schema.to_json_schema())
            .build();

        let response = timed_chat(self.provider.as_ref(), &self.model, llm_request).await?;

        let parsed: Value = serde_json::from_str(strip_code_fence(response.content())).map_err(|e| {
            DomainError::provider(
                self.provider.provider_name(),
                format!("Extraction reply is not valid JSON: {}", e),
            )
        })?;

        let Value::Object(values) = parsed else {
            return Err(DomainError::provider(
                self.provider.provider_name(),
                "Extraction reply is not a JSON object",
            ));
        };

        let kept = request.schema.retain_valid(values);
        debug!(node_id = %request.node_id, fields = kept.len(), "Extracted fields");

        Ok(kept)
    }
}

/// Free-text message generation through an LLM
#[derive(Debug, Clone)]
pub struct LlmMessageGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmMessageGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl MessageGenerator for LlmMessageGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, DomainError> {
        let mut user = request.prompt.clone();

        if !request.variables.is_empty() {
            user.push_str("\n\nKnown information:\n");
            for (name, value) in &request.variables {
                let _ = writeln!(user, "- {}: {}", name, value);
            }
        }

        if !request.transcript.is_empty() {
            let _ = write!(user, "\n\nConversation so far:\n{}", request.transcript);
        }

        let llm_request = LlmRequest::builder()
            .system(GENERATION_SYSTEM_PROMPT)
            .user(user)
            .temperature(0.7)
            .build();

        let response = timed_chat(self.provider.as_ref(), &self.model, llm_request).await?;
        let message = response.content().trim();

        if message.is_empty() {
            return Err(DomainError::provider(
                self.provider.provider_name(),
                "Generated message is empty",
            ));
        }

        Ok(message.to_string())
    }
}

/// Structured-output schema names allow `[a-zA-Z0-9_-]{1,64}`
fn schema_name(node_id: &str) -> String {
    let name: String = node_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();

    if name.is_empty() {
        "extraction".to_string()
    } else {
        name
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
