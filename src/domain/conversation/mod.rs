//! Conversation domain - inbound turns from the voice platform and the
//! outbound call-control channel used to speak back into a live call

mod delivery;
mod turn;

pub use delivery::{ControlContent, ControlMessage, MessageDelivery};
pub use turn::{ConversationTurn, Transcript, TurnRole};

#[cfg(test)]
pub use delivery::MockMessageDelivery;
