//! Events delivered to the caller during a turn

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a turn's ordered event stream.
///
/// Tool events precede every token, and a turn ends with exactly one of
/// `End` or `Error` unless it was cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    ToolResult {
        tool: String,
        data: Value,
        execution_id: String,
    },
    ToolError {
        tool: String,
        error: String,
        execution_id: String,
    },
    Token {
        token: String,
    },
    Error {
        error: String,
    },
    End {
        reason: EndReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
}

impl TurnEvent {
    pub fn end() -> Self {
        Self::End {
            reason: EndReason::Completed,
        }
    }

    /// `End` or `Error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }

    pub fn is_tool_event(&self) -> bool {
        matches!(self, Self::ToolResult { .. } | Self::ToolError { .. })
    }

    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::ToolResult { execution_id, .. } | Self::ToolError { execution_id, .. } => {
                Some(execution_id)
            }
            _ => None,
        }
    }
}
