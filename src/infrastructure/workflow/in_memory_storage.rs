//! In-memory workflow storage implementation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::workflow::{ExecutionKey, Workflow, WorkflowState, WorkflowStorage};
use crate::domain::DomainError;

/// In-memory implementation of WorkflowStorage
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowStorage {
    workflows: Arc<RwLock<HashMap<String, Workflow>>>,
    states: Arc<RwLock<HashMap<ExecutionKey, WorkflowState>>>,
}

impl InMemoryWorkflowStorage {
    /// Create a new empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of executions with persisted state
    pub async fn state_count(&self) -> usize {
        self.states.read().await.len()
    }
}

#[async_trait]
impl WorkflowStorage for InMemoryWorkflowStorage {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), DomainError> {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id().to_string(), workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, DomainError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(id).cloned())
    }

    async fn save_workflow_state(&self, state: &WorkflowState) -> Result<WorkflowState, DomainError> {
        let key = state.key();
        let mut states = self.states.write().await;

        let stored_version = states.get(&key).map(|s| s.version).unwrap_or(0);
        if stored_version != state.version {
            return Err(DomainError::conflict(format!(
                "State for '{}' is at version {}, update was based on version {}",
                key, stored_version, state.version
            )));
        }

        let mut saved = state.clone();
        saved.version += 1;
        states.insert(key, saved.clone());

        Ok(saved)
    }

    async fn get_workflow_state(&self, key: &ExecutionKey) -> Result<WorkflowState, DomainError> {
        let states = self.states.read().await;
        Ok(states
            .get(key)
            .cloned()
            .unwrap_or_else(|| WorkflowState::new(key)))
    }
}
