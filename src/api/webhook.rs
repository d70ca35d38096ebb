//! Voice-platform server message receiver

use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::middleware::truncate_for_log;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::conversation::ConversationTurn;
use crate::domain::workflow::ExecutionKey;

pub const CONVERSATION_UPDATE: &str = "conversation-update";

/// Envelope wrapping every server message
#[derive(Debug, Clone, Deserialize)]
pub struct ServerMessageEnvelope {
    pub message: ServerMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub message_type: String,

    #[serde(default)]
    pub call: Option<CallInfo>,

    /// Full transcript so far, for conversation updates
    #[serde(default)]
    pub messages: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallInfo {
    pub id: String,

    #[serde(default)]
    pub customer: Option<Customer>,

    #[serde(default)]
    pub monitor: Option<Monitor>,
}

impl CallInfo {
    /// The caller's number identifies the user; anonymous calls fall back to the call id
    pub fn user_id(&self) -> &str {
        self.customer
            .as_ref()
            .and_then(|c| c.number.as_deref())
            .filter(|n| !n.is_empty())
            .unwrap_or(self.id.as_str())
    }

    pub fn control_url(&self) -> Option<&str> {
        self.monitor.as_ref().and_then(|m| m.control_url.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    #[serde(default)]
    pub control_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub received: bool,
    pub processed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<bool>,
}

impl WebhookResponse {
    fn ignored() -> Self {
        Self {
            received: true,
            processed: false,
            current_node_id: None,
            is_complete: None,
            delivered: None,
        }
    }
}

/// POST /webhooks/{workflow_id}
pub async fn receive_server_message(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(envelope): Json<ServerMessageEnvelope>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let message = envelope.message;

    if message.message_type != CONVERSATION_UPDATE {
        debug!(
            workflow_id = %workflow_id,
            message_type = %message.message_type,
            "Ignoring server message"
        );
        return Ok(Json(WebhookResponse::ignored()));
    }

    let call = message
        .call
        .ok_or_else(|| ApiError::bad_request("conversation-update requires a call"))?;

    let key = ExecutionKey::new(workflow_id, call.user_id(), call.id.as_str());

    if let Some(last) = message.messages.last() {
        debug!(
            execution = %key,
            role = %last.role,
            message = %truncate_for_log(&last.message, 120),
            "Conversation update received"
        );
    }

    let cancel = state.request_token();
    let _guard = cancel.clone().drop_guard();

    let outcome = state
        .relay
        .handle_update(&key, &message.messages, call.control_url(), &cancel)
        .await?;

    info!(
        execution = %key,
        current_node_id = ?outcome.state.current_node_id,
        is_complete = outcome.state.is_complete,
        delivered = outcome.delivered,
        "Conversation update processed"
    );

    Ok(Json(WebhookResponse {
        received: true,
        processed: true,
        current_node_id: outcome.state.current_node_id,
        is_complete: Some(outcome.state.is_complete),
        delivered: Some(outcome.delivered),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_conversation_update() {
        let envelope: ServerMessageEnvelope = serde_json::from_value(json!({
            "message": {
                "type": "conversation-update",
                "call": {
                    "id": "call-1",
                    "customer": {"number": "+15550100"},
                    "monitor": {"controlUrl": "https://control.example/call-1"}
                },
                "messages": [
                    {"role": "system", "message": "You are helpful", "time": 1.0, "secondsFromStart": 0},
                    {"role": "bot", "message": "Hello!", "time": 2.0, "endTime": 3.0, "secondsFromStart": 1.0, "duration": 1.0},
                    {"role": "user", "message": "Hi, I'm Ada", "time": 4.0, "endTime": 5.0, "secondsFromStart": 3.0, "duration": 1.0}
                ]
            }
        }))
        .unwrap();

        let message = envelope.message;
        assert_eq!(message.message_type, CONVERSATION_UPDATE);
        assert_eq!(message.messages.len(), 3);
        assert!(message.messages[2].is_user());

        let call = message.call.unwrap();
        assert_eq!(call.user_id(), "+15550100");
        assert_eq!(call.control_url(), Some("https://control.example/call-1"));
    }

    #[test]
    fn test_user_id_falls_back_to_call_id() {
        let call: CallInfo = serde_json::from_value(json!({"id": "call-9"})).unwrap();
        assert_eq!(call.user_id(), "call-9");
        assert_eq!(call.control_url(), None);

        let call: CallInfo =
            serde_json::from_value(json!({"id": "call-9", "customer": {"number": ""}})).unwrap();
        assert_eq!(call.user_id(), "call-9");
    }

    #[test]
    fn test_other_message_types_parse_without_call() {
        let envelope: ServerMessageEnvelope = serde_json::from_value(json!({
            "message": {"type": "status-update", "status": "in-progress"}
        }))
        .unwrap();

        assert_eq!(envelope.message.message_type, "status-update");
        assert!(envelope.message.call.is_none());
        assert!(envelope.message.messages.is_empty());
    }
}
