//! Turn progress and result

use std::fmt;

/// Where a turn is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Start,
    SessionResolved,
    DispatchingTools,
    Streaming,
    Persisting,
    Completed,
    Failed,
    Cancelled,
}

impl TurnPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::SessionResolved => "session_resolved",
            Self::DispatchingTools => "dispatching_tools",
            Self::Streaming => "streaming",
            Self::Persisting => "persisting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a turn finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// `end` was emitted
    Completed,
    /// `error` was emitted (or the turn task died)
    Failed { error: String },
    /// The caller cancelled or stopped listening
    Cancelled,
}

impl TurnOutcome {
    pub fn phase(&self) -> TurnPhase {
        match self {
            Self::Completed => TurnPhase::Completed,
            Self::Failed { .. } => TurnPhase::Failed,
            Self::Cancelled => TurnPhase::Cancelled,
        }
    }
}
