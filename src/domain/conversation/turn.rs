use std::fmt;

use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TurnRole {
    System,
    User,
    Bot,
    Assistant,
    Tool,
    Function,
    Other(String),
}

impl TurnRole {
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Bot => "bot",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Function => "function",
            Self::Other(role) => role,
        }
    }
}

impl From<String> for TurnRole {
    fn from(role: String) -> Self {
        match role.as_str() {
            "system" => Self::System,
            "user" => Self::User,
            "bot" => Self::Bot,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            "function" => Self::Function,
            _ => Self::Other(role),
        }
    }
}

impl From<TurnRole> for String {
    fn from(role: TurnRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance of a call transcript as delivered by the voice platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: TurnRole,

    #[serde(default, alias = "content")]
    pub message: String,

    #[serde(default)]
    pub time: f64,

    #[serde(default)]
    pub end_time: f64,

    #[serde(default)]
    pub seconds_from_start: f64,

    #[serde(default)]
    pub duration: f64,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
            time: 0.0,
            end_time: 0.0,
            seconds_from_start: 0.0,
            duration: 0.0,
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(TurnRole::User, message)
    }

    pub fn bot(message: impl Into<String>) -> Self {
        Self::new(TurnRole::Bot, message)
    }

    pub fn is_user(&self) -> bool {
        self.role == TurnRole::User
    }
}

/// Renders turns as `role: message` lines for prompts
pub struct Transcript<'a>(pub &'a [ConversationTurn]);

impl fmt::Display for Transcript<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, turn) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", turn.role, turn.message.trim())?;
        }
        Ok(())
    }
}
