//! Workflow domain module
//!
//! A workflow is an immutable graph of interaction nodes driven by inbound
//! conversation turns on a voice call:
//! - `Say` nodes emit a literal or generated message
//! - `Gather` nodes extract structured values described by a schema
//!
//! Per-execution progress lives in `WorkflowState`, keyed by the
//! `(workflow, user, call)` triple, never on the shared nodes.

mod capability;
mod entity;
mod error;
mod node;
pub mod repository;
mod schema;
mod state;

pub use capability::{
    Capabilities, ExtractionRequest, FieldExtractor, GenerationRequest, MessageGenerator,
};
pub use entity::{validate_workflow_id, Workflow, MAX_ID_LENGTH};
pub use error::WorkflowError;
pub use node::{
    ExecutionContext, GatherNode, MessageType, Node, NodeKind, NodeOutcome, NodeType, SayNode,
    DEFAULT_MAX_ATTEMPTS,
};
pub use repository::WorkflowStorage;
pub use schema::{FieldType, GatherSchema, SchemaField};
pub use state::{ExecutionKey, WorkflowState, LAST_SAY_MESSAGE};

#[cfg(test)]
pub use capability::mock::{PendingExtractor, ScriptedExtractor, ScriptedGenerator};
#[cfg(test)]
pub use repository::mock::MockWorkflowStorage;
