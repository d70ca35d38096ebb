//! Workflow infrastructure implementations

mod engine;
mod in_memory_storage;

pub use engine::{WorkflowEngine, WorkflowEngineConfig, WORKFLOW_COMPLETE_MESSAGE};
pub use in_memory_storage::InMemoryWorkflowStorage;
