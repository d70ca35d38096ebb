//! Per-execution workflow state

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Variable holding the message most recently resolved by a Say node
pub const LAST_SAY_MESSAGE: &str = "lastSayMessage";

/// Identifies one execution: a workflow run for a user on a call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionKey {
    pub workflow_id: String,
    pub user_id: String,
    pub call_id: String,
}

impl ExecutionKey {
    pub fn new(
        workflow_id: impl Into<String>,
        user_id: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            user_id: user_id.into(),
            call_id: call_id.into(),
        }
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.workflow_id, self.user_id, self.call_id)
    }
}

/// Progress record for a single execution
///
/// A state with no `current_node_id` has not been started yet. `version` is
/// the optimistic-concurrency token checked by storage on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub workflow_id: String,
    pub user_id: String,
    pub call_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,

    #[serde(default)]
    pub completed_node_ids: Vec<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, Value>,

    /// Values gathered so far, keyed by Gather node id
    #[serde(default)]
    pub extracted_data: BTreeMap<String, Map<String, Value>>,

    /// Gather attempts that ended with required fields still missing
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_complete: bool,

    #[serde(default)]
    pub version: u64,
}

impl WorkflowState {
    /// A fresh, not yet started state
    pub fn new(key: &ExecutionKey) -> Self {
        Self {
            workflow_id: key.workflow_id.clone(),
            user_id: key.user_id.clone(),
            call_id: key.call_id.clone(),
            current_node_id: None,
            completed_node_ids: Vec::new(),
            variables: BTreeMap::new(),
            extracted_data: BTreeMap::new(),
            attempts: BTreeMap::new(),
            last_message_at: None,
            last_updated_at: None,
            is_complete: false,
            version: 0,
        }
    }

    pub fn key(&self) -> ExecutionKey {
        ExecutionKey::new(&self.workflow_id, &self.user_id, &self.call_id)
    }

    pub fn is_started(&self) -> bool {
        self.current_node_id.is_some() || self.is_complete
    }

    pub fn current_node_id(&self) -> Option<&str> {
        self.current_node_id.as_deref()
    }

    pub fn last_say_message(&self) -> Option<&str> {
        self.variables.get(LAST_SAY_MESSAGE).and_then(Value::as_str)
    }

    /// Values gathered by `node_id`, empty if it has not extracted anything
    pub fn collected(&self, node_id: &str) -> Map<String, Value> {
        self.extracted_data.get(node_id).cloned().unwrap_or_default()
    }

    pub fn attempts_for(&self, node_id: &str) -> u32 {
        self.attempts.get(node_id).copied().unwrap_or(0)
    }

    /// Record `node_id` as executed and move to `next`, completing on `None`
    pub fn complete_node(&mut self, node_id: &str, next: Option<&str>, now: DateTime<Utc>) {
        self.completed_node_ids.push(node_id.to_string());
        self.attempts.remove(node_id);

        match next.filter(|id| !id.is_empty()) {
            Some(next) => self.current_node_id = Some(next.to_string()),
            None => {
                self.current_node_id = None;
                self.is_complete = true;
            }
        }

        self.last_updated_at = Some(now);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated_at = Some(now);
    }
}
