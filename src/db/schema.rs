//! Database schema and record types

use crate::llm::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT,
    title TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    content_json TEXT,
    tokens_in INTEGER,
    tokens_out INTEGER,
    cost_estimate REAL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (session_id) REFERENCES sessions(id),
    UNIQUE (session_id, sequence_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, sequence_id);

CREATE TABLE IF NOT EXISTS tool_executions (
    id TEXT PRIMARY KEY,
    message_id TEXT,
    tool_name TEXT NOT NULL,
    input_json TEXT NOT NULL,
    output_json TEXT,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    error_message TEXT,

    FOREIGN KEY (message_id) REFERENCES messages(id)
);

CREATE INDEX IF NOT EXISTS idx_tool_executions_message ON tool_executions(message_id);
CREATE INDEX IF NOT EXISTS idx_tool_executions_status ON tool_executions(status);
";

/// A conversation container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes applied only when a session is first created
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDefaults {
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub metadata: Option<Value>,
}

/// Longest title derived from a first message
pub const MAX_TITLE_CHARS: usize = 50;

impl SessionDefaults {
    /// Title from the first line of a user message, cut to `MAX_TITLE_CHARS`
    pub fn title_from(message: &str) -> Option<String> {
        let line = message.lines().map(str::trim).find(|l| !l.is_empty())?;
        let mut title: String = line.chars().take(MAX_TITLE_CHARS).collect();
        if line.chars().count() > MAX_TITLE_CHARS {
            title = title.trim_end().to_string();
            title.push('…');
        }
        Some(title)
    }
}

/// One utterance within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    /// Position within the session, starting at 1
    pub sequence_id: i64,
    pub role: Role,
    pub content: String,
    pub content_json: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
    pub cost_estimate: Option<f64>,
}

/// Input for `append_message`; id, sequence and timestamp are assigned
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub content_json: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
    pub cost_estimate: Option<f64>,
}

impl NewMessage {
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            content: content.into(),
            content_json: None,
            created_at: None,
            tokens_in: None,
            tokens_out: None,
            cost_estimate: None,
        }
    }

    #[must_use]
    pub fn with_usage(mut self, tokens_in: i64, tokens_out: i64) -> Self {
        self.tokens_in = Some(tokens_in);
        self.tokens_out = Some(tokens_out);
        self
    }
}

/// Lifecycle of a tool execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    /// Reserved for backends that report progress; the tracker goes
    /// straight from pending to a terminal state
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: String,
    /// User message of the turn that requested the call
    pub message_id: Option<String>,
    pub tool_name: String,
    pub input_json: Value,
    pub output_json: Option<Value>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Input for `create_tool_execution`
#[derive(Debug, Clone, PartialEq)]
pub struct NewToolExecution {
    pub message_id: Option<String>,
    pub tool_name: String,
    pub input_json: Value,
}

/// Terminal transition for a tool execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed { output: Value },
    Failed { error: String },
}

impl ExecutionOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Completed { .. } => ExecutionStatus::Completed,
            Self::Failed { .. } => ExecutionStatus::Failed,
        }
    }
}
