//! Tool contract and built-in tools
//!
//! Tools are stateless singletons: everything a single call needs arrives
//! through its arguments and the `ToolContext`.

mod fs;
mod git;
pub mod patch;
pub mod schema;
mod terminal;

pub use fs::{FsApplyPatchTool, FsReadTool, FsWriteTool};
pub use git::GitStatusTool;
pub use terminal::{TerminalExecTool, SAFE_COMMANDS};

use crate::config::Config;
use crate::registry::ToolRegistry;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Context handed to every tool invocation.
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
    /// Fires when the owning turn is cancelled
    pub cancel: CancellationToken,

    /// Session the call belongs to, when the turn is persisted
    pub session_id: Option<String>,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, session_id: Option<String>) -> Self {
        Self { cancel, session_id }
    }
}

/// Failure of a single tool call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Failure reported by the tool itself; displayed verbatim
    #[error("{0}")]
    Execution(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        Self::Execution(e.to_string())
    }
}

/// A named capability the orchestrator can invoke on the caller's behalf
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key, e.g. `fs.read`
    fn name(&self) -> &str;

    /// Human-readable summary
    fn description(&self) -> String;

    /// JSON schema for the arguments object; checked before `run` is called
    fn input_schema(&self) -> Value;

    /// Per-tool limit; `None` falls back to the configured default
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute with arguments that already passed schema validation.
    ///
    /// Tools that spawn subprocesses should watch `ctx.cancel` and stop
    /// early when it fires.
    async fn run(&self, args: Map<String, Value>, ctx: ToolContext) -> Result<Value, ToolError>;
}

/// Build the tools enabled by `config`.
///
/// `terminal.exec` and `git.status` are gated on their enable flags, and
/// `git.status` additionally needs a `git` binary on `PATH`. When
/// `ALLOWED_TOOLS` is set, anything not listed is skipped.
pub fn builtin_tools(config: &Config) -> Vec<Arc<dyn Tool>> {
    let base = config.allow_fs_base.clone();
    let mut tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(FsReadTool::new(base.clone())),
        Arc::new(FsWriteTool::new(base.clone())),
        Arc::new(FsApplyPatchTool::new(base.clone())),
    ];

    if config.enable_terminal {
        tools.push(Arc::new(TerminalExecTool::new(base.clone())));
    }

    if config.enable_git {
        match GitStatusTool::locate(base) {
            Some(tool) => tools.push(Arc::new(tool)),
            None => tracing::warn!("git not found on PATH, git.status disabled"),
        }
    }

    if let Some(allowed) = &config.allowed_tools {
        tools.retain(|t| allowed.iter().any(|name| name == t.name()));
    }
    tools
}

/// Register every tool from `builtin_tools`
pub fn register_builtin_tools(registry: &mut ToolRegistry, config: &Config) {
    for tool in builtin_tools(config) {
        registry.register(tool);
    }
}
