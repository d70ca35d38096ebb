//! Workflow error types

use thiserror::Error;

use crate::domain::DomainError;

/// Errors that can occur while defining or executing a workflow
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Extraction failed in '{node}': {message}")]
    Extraction { node: String, message: String },

    #[error("Generation failed in '{node}': {message}")]
    Generation { node: String, message: String },

    #[error("Invalid configuration for node '{node}': {message}")]
    InvalidNodeConfig { node: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn node_not_found(node_id: impl Into<String>) -> Self {
        Self::NodeNotFound {
            node_id: node_id.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn extraction(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn generation(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn invalid_node_config(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNodeConfig {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Transient failures that a caller may retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Conflict(_))
    }
}

impl From<DomainError> for WorkflowError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { message } => Self::NotFound(message),
            DomainError::Validation { message } => Self::Validation(message),
            DomainError::Conflict { message } => Self::Conflict(message),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkflowError::not_found("intake");
        assert_eq!(err.to_string(), "Workflow not found: intake");

        let err = WorkflowError::node_not_found("ghost");
        assert_eq!(err.to_string(), "Node not found: ghost");

        let err = WorkflowError::extraction("profile", "provider timed out");
        assert_eq!(
            err.to_string(),
            "Extraction failed in 'profile': provider timed out"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(WorkflowError::storage("disk full").is_retryable());
        assert!(WorkflowError::conflict("version 3 != 4").is_retryable());
        assert!(!WorkflowError::validation("empty id").is_retryable());
        assert!(!WorkflowError::Cancelled.is_retryable());
    }

    #[test]
    fn test_from_domain_error() {
        let err: WorkflowError = DomainError::conflict("stale").into();
        assert_eq!(err, WorkflowError::conflict("stale"));

        let err: WorkflowError = DomainError::storage("lock poisoned").into();
        assert!(matches!(err, WorkflowError::Storage(_)));
    }
}
