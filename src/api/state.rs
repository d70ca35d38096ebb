//! Application state for shared services

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::infrastructure::services::ConversationRelay;
use crate::infrastructure::workflow::WorkflowEngine;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub relay: Arc<ConversationRelay>,
    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    /// The relay must wrap the same engine instance
    pub fn new(relay: Arc<ConversationRelay>, shutdown: CancellationToken) -> Self {
        Self {
            engine: relay.engine().clone(),
            relay,
            shutdown,
        }
    }

    /// Token for one request: cancelled on shutdown, or when the handler drops it
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
