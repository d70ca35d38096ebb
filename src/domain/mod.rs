//! Domain layer - Core business logic and entities

pub mod conversation;
pub mod error;
pub mod llm;
pub mod workflow;

pub use conversation::{ControlMessage, ConversationTurn, MessageDelivery, Transcript, TurnRole};
pub use error::DomainError;
pub use llm::{
    FinishReason, LlmProvider, LlmRequest, LlmRequestBuilder, LlmResponse, Message, MessageRole,
    Usage,
};
pub use workflow::{
    Capabilities, ExecutionKey, FieldExtractor, MessageGenerator, Node, NodeKind, NodeType,
    Workflow, WorkflowError, WorkflowState, WorkflowStorage,
};
