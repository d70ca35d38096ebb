//! Infrastructure services

mod conversation_relay;

pub use conversation_relay::{ConversationRelay, RelayOutcome};
