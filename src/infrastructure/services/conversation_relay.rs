//! Relays conversation updates from a call into the workflow engine and
//! speaks the resulting prompt back into the call

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::conversation::{ControlMessage, ConversationTurn, MessageDelivery};
use crate::domain::workflow::{ExecutionKey, WorkflowError, WorkflowState};
use crate::infrastructure::observability::record_delivery;
use crate::infrastructure::workflow::WorkflowEngine;

/// Result of relaying one conversation update
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutcome {
    pub state: WorkflowState,
    /// Message computed for the caller, when the last turn was theirs
    pub message: Option<String>,
    pub delivered: bool,
}

/// Connects webhook deliveries to the engine and the call-control channel
pub struct ConversationRelay {
    engine: Arc<WorkflowEngine>,
    delivery: Arc<dyn MessageDelivery>,
    role: String,
    trigger_response: bool,
}

impl ConversationRelay {
    pub fn new(engine: Arc<WorkflowEngine>, delivery: Arc<dyn MessageDelivery>) -> Self {
        Self {
            engine,
            delivery,
            role: "system".to_string(),
            trigger_response: true,
        }
    }

    /// Role and trigger flag attached to every injected message
    pub fn with_control_options(mut self, role: impl Into<String>, trigger_response: bool) -> Self {
        self.role = role.into();
        self.trigger_response = trigger_response;
        self
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Start the execution if needed, advance it, and answer the caller
    ///
    /// Delivery failures are logged and reported through `delivered`; they
    /// never undo the state transition.
    pub async fn handle_update(
        &self,
        key: &ExecutionKey,
        turns: &[ConversationTurn],
        control_url: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, WorkflowError> {
        self.engine.start_workflow(key).await?;
        let state = self
            .engine
            .process_conversation_update(key, turns, cancel)
            .await?;

        if !turns.last().is_some_and(ConversationTurn::is_user) {
            debug!(execution = %key, "Last turn was not from the caller; nothing to say");
            return Ok(RelayOutcome {
                state,
                message: None,
                delivered: false,
            });
        }

        let message = self
            .engine
            .get_current_node_message_with_turns(key, turns, cancel)
            .await?;

        let delivered = match control_url {
            _ if message.trim().is_empty() => {
                debug!(execution = %key, "Current message is empty; nothing to deliver");
                false
            }
            Some(url) => self.deliver(key, url, &message).await,
            None => {
                warn!(execution = %key, "No control URL on call; message not delivered");
                false
            }
        };

        Ok(RelayOutcome {
            state,
            message: Some(message),
            delivered,
        })
    }

    async fn deliver(&self, key: &ExecutionKey, control_url: &str, message: &str) -> bool {
        let control = ControlMessage::add_message(&self.role, message, self.trigger_response);

        let delivered = match self.delivery.deliver(control_url, &control).await {
            Ok(()) => true,
            Err(e) => {
                warn!(execution = %key, error = %e, "Failed to deliver message to call");
                false
            }
        };

        record_delivery(delivered);
        delivered
    }
}
