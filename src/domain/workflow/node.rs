//! Workflow nodes: the interaction steps of a call script

use std::fmt::Write as _;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::capability::{Capabilities, ExtractionRequest, GenerationRequest};
use super::error::WorkflowError;
use super::schema::{GatherSchema, SchemaField};
use super::state::{WorkflowState, LAST_SAY_MESSAGE};
use crate::domain::conversation::{ConversationTurn, Transcript};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const GATHER_COMPLETE_MESSAGE: &str = "Thank you for providing that information.";

/// Discriminator for node variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Say,
    Gather,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Say => "say",
            Self::Gather => "gather",
        }
    }
}

/// How a Say node produces its text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Exact,
    Generated,
}

/// Emits a message to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SayNode {
    #[serde(default)]
    pub message_type: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_prompt: Option<String>,
}

impl SayNode {
    pub fn exact(message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Exact,
            message: Some(message.into()),
            llm_prompt: None,
        }
    }

    pub fn generated(llm_prompt: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Generated,
            message: None,
            llm_prompt: Some(llm_prompt.into()),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self.message_type {
            MessageType::Exact if self.message.as_deref().is_none_or(|m| m.trim().is_empty()) => {
                Err("exact say node requires a message".to_string())
            }
            MessageType::Generated if self.llm_prompt.as_deref().is_none_or(str::is_empty) => {
                Err("generated say node requires an llmPrompt".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Extracts structured values from the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherNode {
    pub schema: GatherSchema,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub llm_prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_node_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_prompt: Option<String>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl GatherNode {
    pub fn new(schema: GatherSchema, llm_prompt: impl Into<String>) -> Self {
        Self {
            schema,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            llm_prompt: llm_prompt.into(),
            fallback_node_id: None,
            follow_up_prompt: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_fallback(mut self, node_id: impl Into<String>) -> Self {
        self.fallback_node_id = Some(node_id.into());
        self
    }

    pub fn with_follow_up(mut self, prompt: impl Into<String>) -> Self {
        self.follow_up_prompt = Some(prompt.into());
        self
    }

    /// Attempts allowed per cycle; zero is treated as one
    pub fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn extraction_prompt(&self, missing: &[&SchemaField]) -> String {
        let mut prompt = self.llm_prompt.clone();
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }

        prompt.push_str("Please extract the following information:\n");
        for field in missing {
            let _ = write!(prompt, "- {} ({})", field.name, field.field_type.type_name());
            if !field.description.is_empty() {
                let _ = write!(prompt, ": {}", field.description);
            }
            prompt.push('\n');
        }

        prompt
    }
}

/// Variant-specific configuration of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Say(SayNode),
    Gather(GatherNode),
}

impl From<SayNode> for NodeKind {
    fn from(node: SayNode) -> Self {
        Self::Say(node)
    }
}

impl From<GatherNode> for NodeKind {
    fn from(node: GatherNode) -> Self {
        Self::Gather(node)
    }
}

/// Collaborators available to a node while it executes
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub capabilities: &'a Capabilities,
    pub turns: &'a [ConversationTurn],
    pub cancel: &'a CancellationToken,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        capabilities: &'a Capabilities,
        turns: &'a [ConversationTurn],
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            capabilities,
            turns,
            cancel,
        }
    }

    fn transcript(&self) -> String {
        Transcript(self.turns).to_string()
    }
}

/// Result of executing a node against a state
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The node completed and the state moved along `next_node_id`
    Advanced,

    /// A Gather node is still missing required fields and stays current
    Waiting { attempt: u32, missing: Vec<String> },

    /// The node completed by routing to its fallback
    FellBack { fallback: String, reason: String },

    /// The execution was already complete; nothing changed
    Skipped,
}

/// What a node decided to do, computed without touching the state
enum Resolution {
    Said(String),
    PassThrough,
    Extracted(Map<String, Value>),
    Fallback { fallback: String, reason: String },
}

/// A single interaction step within a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_node_id: Option<String>,

    #[serde(flatten)]
    kind: NodeKind,

    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    last_updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: impl Into<NodeKind>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            next_node_id: None,
            kind: kind.into(),
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn with_next(mut self, next_node_id: impl Into<String>) -> Self {
        self.next_node_id = Some(next_node_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Say(_) => NodeType::Say,
            NodeKind::Gather(_) => NodeType::Gather,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Forward edge; `None` marks a terminal node
    pub fn next_node_id(&self) -> Option<&str> {
        self.next_node_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    /// Every node id this node can transition to
    pub fn successors(&self) -> Vec<&str> {
        let mut successors: Vec<&str> = self.next_node_id().into_iter().collect();
        if let NodeKind::Gather(gather) = &self.kind {
            if let Some(fallback) = gather.fallback_node_id.as_deref().filter(|f| !f.is_empty()) {
                successors.push(fallback);
            }
        }
        successors
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.id.trim().is_empty() {
            return Err(WorkflowError::validation("Node ID cannot be empty"));
        }

        let result = match &self.kind {
            NodeKind::Say(say) => say.validate(),
            NodeKind::Gather(gather) => gather.schema.validate(),
        };

        result.map_err(|message| WorkflowError::validation(format!("node '{}': {}", self.id, message)))
    }

    /// Run the node against `state`
    ///
    /// Capability calls happen before any mutation, so on error `state` is
    /// left exactly as it was.
    pub async fn execute(
        &self,
        state: &mut WorkflowState,
        ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, WorkflowError> {
        if state.is_complete {
            return Ok(NodeOutcome::Skipped);
        }

        let resolution = self.resolve(state, ctx).await?;
        Ok(self.apply(state, resolution, Utc::now()))
    }

    /// The message to speak while this node is current
    ///
    /// Generated Say text is produced afresh here, so it can differ from the
    /// text recorded as `lastSayMessage` when the node later executes.
    pub async fn render_message(
        &self,
        state: &WorkflowState,
        ctx: &ExecutionContext<'_>,
    ) -> Result<String, WorkflowError> {
        match &self.kind {
            NodeKind::Say(say) => self.say_message(say, state, ctx).await,
            NodeKind::Gather(gather) => {
                let collected = state.collected(&self.id);
                let missing = gather.schema.missing_required(&collected);

                if missing.is_empty() {
                    return Ok(GATHER_COMPLETE_MESSAGE.to_string());
                }

                if state.attempts_for(&self.id) > 0 {
                    if let Some(follow_up) = gather.follow_up_prompt.as_deref().filter(|p| !p.is_empty()) {
                        return Ok(follow_up.to_string());
                    }
                }

                let mut message = String::from("I need to gather some information from you:\n");
                for field in missing {
                    if field.description.is_empty() {
                        let _ = writeln!(message, "- {}", field.name);
                    } else {
                        let _ = writeln!(message, "- {}: {}", field.name, field.description);
                    }
                }
                Ok(message)
            }
        }
    }

    async fn resolve(
        &self,
        state: &WorkflowState,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Resolution, WorkflowError> {
        match &self.kind {
            NodeKind::Say(say) => Ok(Resolution::Said(self.say_message(say, state, ctx).await?)),
            NodeKind::Gather(gather) => self.resolve_gather(gather, state, ctx).await,
        }
    }

    async fn say_message(
        &self,
        say: &SayNode,
        state: &WorkflowState,
        ctx: &ExecutionContext<'_>,
    ) -> Result<String, WorkflowError> {
        match say.message_type {
            MessageType::Exact => say.message.clone().ok_or_else(|| {
                WorkflowError::invalid_node_config(&self.id, "exact say node has no message")
            }),
            MessageType::Generated => {
                let prompt = say
                    .llm_prompt
                    .clone()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        WorkflowError::invalid_node_config(&self.id, "generated say node has no llmPrompt")
                    })?;

                let request = GenerationRequest {
                    node_id: self.id.clone(),
                    prompt,
                    variables: state.variables.clone(),
                    transcript: ctx.transcript(),
                };

                cancellable(ctx.cancel, ctx.capabilities.generator.generate(request))
                    .await?
                    .map_err(|e| WorkflowError::generation(&self.id, e.to_string()))
            }
        }
    }

    async fn resolve_gather(
        &self,
        gather: &GatherNode,
        state: &WorkflowState,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Resolution, WorkflowError> {
        let collected = state.collected(&self.id);
        let missing = gather.schema.missing_required(&collected);

        if missing.is_empty() {
            return Ok(Resolution::PassThrough);
        }

        let request = ExtractionRequest {
            node_id: self.id.clone(),
            prompt: gather.extraction_prompt(&missing),
            schema: gather.schema.clone(),
            transcript: ctx.transcript(),
        };

        let limit = gather.attempt_limit();
        let mut last_error = String::new();

        for _ in 0..limit {
            match cancellable(ctx.cancel, ctx.capabilities.extractor.extract(request.clone())).await? {
                Ok(values) => return Ok(Resolution::Extracted(gather.schema.retain_valid(values))),
                Err(e) => last_error = e.to_string(),
            }
        }

        match gather.fallback_node_id.as_deref().filter(|f| !f.is_empty()) {
            Some(fallback) => Ok(Resolution::Fallback {
                fallback: fallback.to_string(),
                reason: format!("extraction failed after {} attempts: {}", limit, last_error),
            }),
            None => Err(WorkflowError::extraction(&self.id, last_error)),
        }
    }

    fn apply(&self, state: &mut WorkflowState, resolution: Resolution, now: DateTime<Utc>) -> NodeOutcome {
        match resolution {
            Resolution::Said(message) => {
                state
                    .variables
                    .insert(LAST_SAY_MESSAGE.to_string(), Value::String(message));
                state.complete_node(&self.id, self.next_node_id(), now);
                NodeOutcome::Advanced
            }
            Resolution::PassThrough => {
                state.complete_node(&self.id, self.next_node_id(), now);
                NodeOutcome::Advanced
            }
            Resolution::Fallback { fallback, reason } => {
                state.complete_node(&self.id, Some(&fallback), now);
                NodeOutcome::FellBack { fallback, reason }
            }
            Resolution::Extracted(values) => self.apply_extracted(state, values, now),
        }
    }

    fn apply_extracted(
        &self,
        state: &mut WorkflowState,
        values: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> NodeOutcome {
        let NodeKind::Gather(gather) = &self.kind else {
            state.complete_node(&self.id, self.next_node_id(), now);
            return NodeOutcome::Advanced;
        };

        let collected = state.extracted_data.entry(self.id.clone()).or_default();
        for (name, value) in values {
            state.variables.insert(name.clone(), value.clone());
            collected.insert(name, value);
        }

        let missing: Vec<String> = gather
            .schema
            .missing_required(collected)
            .into_iter()
            .map(|f| f.name.clone())
            .collect();

        if missing.is_empty() {
            state.complete_node(&self.id, self.next_node_id(), now);
            return NodeOutcome::Advanced;
        }

        let attempt = {
            let counter = state.attempts.entry(self.id.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        if attempt < gather.attempt_limit() {
            state.touch(now);
            return NodeOutcome::Waiting { attempt, missing };
        }

        match gather.fallback_node_id.as_deref().filter(|f| !f.is_empty()) {
            Some(fallback) => {
                state.complete_node(&self.id, Some(fallback), now);
                NodeOutcome::FellBack {
                    fallback: fallback.to_string(),
                    reason: format!("still missing {} after {} attempts", missing.join(", "), attempt),
                }
            }
            None => {
                state.complete_node(&self.id, self.next_node_id(), now);
                NodeOutcome::Advanced
            }
        }
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = T>,
) -> Result<T, WorkflowError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
        value = future => Ok(value),
    }
}
