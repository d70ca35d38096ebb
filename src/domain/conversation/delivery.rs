use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Role/content pair injected into a live call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlContent {
    pub role: String,
    pub content: String,
}

/// Payload posted to a call's control URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: ControlContent,
    pub trigger_response_enabled: bool,
}

impl ControlMessage {
    pub fn add_message(
        role: impl Into<String>,
        content: impl Into<String>,
        trigger_response: bool,
    ) -> Self {
        Self {
            kind: "add-message".to_string(),
            message: ControlContent {
                role: role.into(),
                content: content.into(),
            },
            trigger_response_enabled: trigger_response,
        }
    }
}

/// Fire-and-forget channel that speaks a message into a live call
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    async fn deliver(&self, control_url: &str, message: &ControlMessage) -> Result<(), DomainError>;
}
