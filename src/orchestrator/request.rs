//! Turn input

use crate::llm::ChatTurn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation requested for this turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Arguments object; `null` or absent means no arguments
    #[serde(default)]
    pub params: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Everything one turn needs.
///
/// `user_message` is the new utterance; `history` holds only earlier turns
/// and is passed to the provider ahead of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub user_message: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl TurnRequest {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_tool_call(mut self, name: impl Into<String>, params: Value) -> Self {
        self.tool_calls.push(ToolCall::new(name, params));
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// History followed by the new user message
    pub fn provider_turns(&self) -> Vec<ChatTurn> {
        let mut turns = self.history.clone();
        turns.push(ChatTurn::user(self.user_message.clone()));
        turns
    }
}
