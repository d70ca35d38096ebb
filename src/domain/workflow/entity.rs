//! Workflow domain entity

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::WorkflowError;
use super::node::Node;

/// Maximum length for workflow IDs
pub const MAX_ID_LENGTH: usize = 64;

/// Alphanumeric, hyphens and underscores
static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

/// Validate a workflow ID string
pub fn validate_workflow_id(id: &str) -> Result<(), WorkflowError> {
    if id.is_empty() {
        return Err(WorkflowError::validation("Workflow ID cannot be empty"));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(WorkflowError::validation(format!(
            "Workflow ID exceeds maximum length of {} characters",
            MAX_ID_LENGTH
        )));
    }

    if !ID_PATTERN.is_match(id) {
        return Err(WorkflowError::validation(format!(
            "Invalid workflow ID '{}': must contain only alphanumerics, hyphens and underscores",
            id
        )));
    }

    Ok(())
}

/// An immutable graph of nodes with a single entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    id: String,

    #[serde(default)]
    name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,

    nodes: HashMap<String, Node>,

    start_node_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        start_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            nodes: HashMap::new(),
            start_node_id: start_node_id.into(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.insert(node.id().to_string(), node);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn nodes(&self) -> &HashMap<String, Node> {
        &self.nodes
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Set `created_at` if unset and refresh `updated_at`
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.created_at.get_or_insert(now);
        self.updated_at = Some(now);
    }

    /// Check every structural invariant of the graph
    pub fn validate(&self) -> Result<(), WorkflowError> {
        validate_workflow_id(&self.id)?;

        if self.nodes.is_empty() {
            return Err(WorkflowError::validation("Workflow must have at least one node"));
        }

        if self.start_node_id.is_empty() {
            return Err(WorkflowError::validation("Start node ID cannot be empty"));
        }

        if !self.nodes.contains_key(&self.start_node_id) {
            return Err(WorkflowError::validation(format!(
                "Start node '{}' does not exist",
                self.start_node_id
            )));
        }

        for (key, node) in &self.nodes {
            if key != node.id() {
                return Err(WorkflowError::validation(format!(
                    "Node key '{}' does not match node ID '{}'",
                    key,
                    node.id()
                )));
            }

            node.validate()?;

            for successor in node.successors() {
                if !self.nodes.contains_key(successor) {
                    return Err(WorkflowError::validation(format!(
                        "Node '{}' references unknown node '{}'",
                        key, successor
                    )));
                }
            }
        }

        Ok(())
    }

    /// Node ids reachable from the start node, breadth first
    pub fn traversal(&self) -> Vec<&str> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.start_node_id.as_str()]);

        while let Some(node_id) = queue.pop_front() {
            if !seen.insert(node_id) {
                continue;
            }

            let Some(node) = self.nodes.get(node_id) else {
                continue;
            };

            order.push(node.id());
            queue.extend(node.successors());
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::node::{GatherNode, SayNode};
    use crate::domain::workflow::schema::{FieldType, GatherSchema, SchemaField};
    use serde_json::json;

    fn intake() -> Workflow {
        let schema = GatherSchema::new("Caller")
            .with_field(SchemaField::required("name", FieldType::String));

        Workflow::new("patient-intake", "Patient intake", "greet")
            .with_node(Node::new("greet", SayNode::exact("Hello!")).with_next("name"))
            .with_node(
                Node::new("name", GatherNode::new(schema, "Ask for name").with_fallback("agent"))
                    .with_next("bye"),
            )
            .with_node(Node::new("agent", SayNode::exact("Transferring you.")))
            .with_node(Node::new("bye", SayNode::generated("Say goodbye")))
    }

    #[test]
    fn test_validate_workflow_id() {
        assert!(validate_workflow_id("intake").is_ok());
        assert!(validate_workflow_id("intake_v2-final").is_ok());
        assert!(validate_workflow_id("").is_err());
        assert!(validate_workflow_id("has space").is_err());
        assert!(validate_workflow_id("a/b").is_err());
        assert!(validate_workflow_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_valid_workflow() {
        assert!(intake().validate().is_ok());
    }

    #[test]
    fn test_empty_nodes_rejected() {
        let workflow = Workflow::new("empty", "Empty", "start");
        let err = workflow.validate().unwrap_err();
        assert!(err.to_string().contains("at least one node"));
    }

    #[test]
    fn test_missing_start_node_rejected() {
        let workflow = Workflow::new("wf", "Wf", "missing")
            .with_node(Node::new("greet", SayNode::exact("Hi")));
        let err = workflow.validate().unwrap_err();
        assert!(err.to_string().contains("Start node 'missing'"));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let workflow = Workflow::new("wf", "Wf", "greet")
            .with_node(Node::new("greet", SayNode::exact("Hi")).with_next("nowhere"));
        let err = workflow.validate().unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(ref m) if m.contains("nowhere")));
    }

    #[test]
    fn test_key_mismatch_rejected() {
        let workflow: Workflow = serde_json::from_value(json!({
            "id": "wf",
            "name": "Wf",
            "startNodeId": "greet",
            "nodes": {
                "greet": {"id": "hello", "type": "say", "message": "Hi"}
            }
        }))
        .unwrap();

        assert!(workflow.validate().is_err());
    }

    #[test]
    fn test_stamp_preserves_created_at() {
        let mut workflow = intake();
        let first = Utc::now();
        workflow.stamp(first);
        let later = first + chrono::Duration::seconds(5);
        workflow.stamp(later);

        assert_eq!(workflow.created_at(), Some(first));
        assert_eq!(workflow.updated_at(), Some(later));
    }

    #[test]
    fn test_traversal_order() {
        assert_eq!(intake().traversal(), vec!["greet", "name", "bye", "agent"]);
    }

    #[test]
    fn test_round_trip_serialization() {
        let mut workflow = intake();
        workflow.stamp(Utc::now());

        let json = serde_json::to_string(&workflow).unwrap();
        let parsed: Workflow = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, workflow);
    }
}
