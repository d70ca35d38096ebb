//! Workflow storage trait

use async_trait::async_trait;

use super::entity::Workflow;
use super::state::{ExecutionKey, WorkflowState};
use crate::domain::DomainError;

/// Durable persistence for workflow definitions and execution state
#[async_trait]
pub trait WorkflowStorage: Send + Sync + std::fmt::Debug {
    /// Insert or replace a workflow definition
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), DomainError>;

    /// Get a workflow by ID
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, DomainError>;

    /// Persist `state` if the stored version still equals `state.version`
    ///
    /// Returns the saved state with its version incremented, or
    /// `DomainError::Conflict` when another writer got there first.
    async fn save_workflow_state(&self, state: &WorkflowState)
        -> Result<WorkflowState, DomainError>;

    /// Load the state for `key`, or a fresh unstarted state if none exists
    async fn get_workflow_state(&self, key: &ExecutionKey) -> Result<WorkflowState, DomainError>;
}
