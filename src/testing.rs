//! Mock implementations for testing
//!
//! These mocks let the orchestrator and tracker run without real I/O.

use crate::db::{
    DbError, DbResult, ExecutionOutcome, ExecutionStatus, Message, NewMessage, NewToolExecution,
    Session, SessionDefaults, ToolExecution,
};
use crate::llm::{ChatProvider, ChatTurn, LlmError, StreamChunk, TokenStream, Usage};
use crate::store::ConversationStore;
use crate::tools::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Tools
// ============================================================================

/// Returns its arguments unchanged
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> String {
        "Echo the arguments back".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn run(&self, args: Map<String, Value>, _ctx: ToolContext) -> Result<Value, ToolError> {
        Ok(Value::Object(args))
    }
}

/// Always fails with `ToolError::Execution(message)`
pub struct FailingTool {
    name: String,
    message: String,
}

impl FailingTool {
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("Always fails with: {}", self.message)
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn run(&self, _args: Map<String, Value>, _ctx: ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::execution(self.message.clone()))
    }
}

/// Requires a string `path` and nothing else
pub struct StrictTool;

#[async_trait]
impl Tool for StrictTool {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn description(&self) -> String {
        "Accepts exactly one string field".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {"path": {"type": "string"}},
            "additionalProperties": false
        })
    }

    async fn run(&self, args: Map<String, Value>, _ctx: ToolContext) -> Result<Value, ToolError> {
        Ok(json!({"path": args.get("path").cloned()}))
    }
}

/// Sleeps before answering; ignores cancellation so only the caller can
/// cut it short
pub struct SlowTool {
    delay: Duration,
    timeout: Option<Duration>,
    /// Notified when `run` starts
    pub started: Arc<Notify>,
    pub runs: AtomicUsize,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timeout: None,
            started: Arc::new(Notify::new()),
            runs: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn description(&self) -> String {
        format!("Sleeps for {:?}", self.delay)
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run(&self, _args: Map<String, Value>, _ctx: ToolContext) -> Result<Value, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Ok(json!("done"))
    }
}

// ============================================================================
// Provider
// ============================================================================

#[derive(Clone)]
enum Ending {
    Complete,
    Fail(LlmError),
    Hang,
}

/// Provider that replays a fixed script of tokens
pub struct ScriptedProvider {
    name: String,
    tokens: Vec<String>,
    usage: Option<Usage>,
    open_error: Option<LlmError>,
    ending: Ending,
    /// Turns passed to each `stream_chat` call
    pub requests: Mutex<Vec<Vec<ChatTurn>>>,
    /// Set once a returned stream has been dropped
    pub stream_dropped: Arc<AtomicBool>,
    /// Notified after the last scripted token has been yielded
    pub tokens_sent: Arc<Notify>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokens: Vec::new(),
            usage: None,
            open_error: None,
            ending: Ending::Complete,
            requests: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
            tokens_sent: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }

    /// Reject the request before any token
    #[must_use]
    pub fn fail_on_open(mut self, error: LlmError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Yield the scripted tokens, then this error
    #[must_use]
    pub fn fail_after_tokens(mut self, error: LlmError) -> Self {
        self.ending = Ending::Fail(error);
        self
    }

    /// Yield the scripted tokens, then never finish
    #[must_use]
    pub fn hang_after_tokens(mut self) -> Self {
        self.ending = Ending::Hang;
        self
    }

    pub fn recorded_requests(&self) -> Vec<Vec<ChatTurn>> {
        self.requests.lock().unwrap().clone()
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(&self, turns: &[ChatTurn], _model: &str) -> Result<TokenStream, LlmError> {
        self.requests.lock().unwrap().push(turns.to_vec());
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }

        let mut items: Vec<Result<StreamChunk, LlmError>> = self
            .tokens
            .iter()
            .map(|t| Ok(StreamChunk::token(t.clone())))
            .collect();
        if let Some(usage) = self.usage {
            items.push(Ok(StreamChunk::Usage(usage)));
        }

        let sent = self.tokens_sent.clone();
        let flag = DropFlag(self.stream_dropped.clone());
        let body = futures::stream::iter(items.into_iter().map(Some))
            .chain(futures::stream::once(async move {
                sent.notify_one();
                None
            }))
            .filter_map(futures::future::ready);

        let stream: TokenStream = match self.ending.clone() {
            Ending::Complete => body.boxed(),
            Ending::Fail(error) => body.chain(futures::stream::iter([Err(error)])).boxed(),
            Ending::Hang => body.chain(futures::stream::pending()).boxed(),
        };

        Ok(stream
            .map(move |item| {
                let _keep = &flag;
                item
            })
            .boxed())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct StoreState {
    sessions: HashMap<String, Session>,
    messages: Vec<Message>,
    executions: Vec<ToolExecution>,
}

/// `ConversationStore` backed by plain collections
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    /// When set, every write fails with a SQLite-style error
    pub fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    fn check_writable(&self) -> DbResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        Ok(())
    }

    pub fn all_executions(&self) -> Vec<ToolExecution> {
        self.state.lock().unwrap().executions.clone()
    }

    pub fn all_messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn resolve_or_create_session(
        &self,
        id: &str,
        defaults: SessionDefaults,
    ) -> DbResult<Session> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let session = state
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Session {
                id: id.to_string(),
                user_id: defaults.user_id,
                title: defaults.title,
                metadata: defaults.metadata,
                created_at: now,
                updated_at: now,
            });
        Ok(session.clone())
    }

    async fn get_session(&self, id: &str) -> DbResult<Option<Session>> {
        Ok(self.state.lock().unwrap().sessions.get(id).cloned())
    }

    async fn append_message(&self, message: NewMessage) -> DbResult<Message> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let Some(session) = state.sessions.get_mut(&message.session_id) else {
            return Err(DbError::SessionNotFound(message.session_id));
        };
        session.updated_at = now;

        let sequence_id = state
            .messages
            .iter()
            .filter(|m| m.session_id == message.session_id)
            .map(|m| m.sequence_id)
            .max()
            .unwrap_or(0)
            + 1;
        let stored = Message {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: message.session_id,
            sequence_id,
            role: message.role,
            content: message.content,
            content_json: message.content_json,
            created_at: message.created_at.unwrap_or(now),
            tokens_in: message.tokens_in,
            tokens_out: message.tokens_out,
            cost_estimate: message.cost_estimate,
        };
        state.messages.push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, session_id: &str, limit: usize) -> DbResult<Vec<Message>> {
        let state = self.state.lock().unwrap();
        let mut messages: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.sequence_id.cmp(&a.sequence_id));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn create_tool_execution(
        &self,
        execution: NewToolExecution,
    ) -> DbResult<ToolExecution> {
        self.check_writable()?;
        let record = ToolExecution {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: execution.message_id,
            tool_name: execution.tool_name,
            input_json: execution.input_json,
            output_json: None,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
        };
        self.state.lock().unwrap().executions.push(record.clone());
        Ok(record)
    }

    async fn update_tool_execution(
        &self,
        id: &str,
        outcome: ExecutionOutcome,
    ) -> DbResult<ToolExecution> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        let Some(record) = state.executions.iter_mut().find(|e| e.id == id) else {
            return Err(DbError::ExecutionNotFound(id.to_string()));
        };
        if record.status.is_terminal() {
            return Err(DbError::ExecutionAlreadyFinished {
                id: id.to_string(),
                status: record.status,
            });
        }

        record.status = outcome.status();
        record.finished_at = Some(Utc::now());
        match outcome {
            ExecutionOutcome::Completed { output } => record.output_json = Some(output),
            ExecutionOutcome::Failed { error } => record.error_message = Some(error),
        }
        Ok(record.clone())
    }

    async fn get_tool_execution(&self, id: &str) -> DbResult<ToolExecution> {
        self.state
            .lock()
            .unwrap()
            .executions
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| DbError::ExecutionNotFound(id.to_string()))
    }

    async fn list_tool_executions(&self, message_id: &str) -> DbResult<Vec<ToolExecution>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .executions
            .iter()
            .filter(|e| e.message_id.as_deref() == Some(message_id))
            .cloned()
            .collect())
    }

    async fn fail_pending_tool_executions(&self, reason: &str) -> DbResult<usize> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        let mut count = 0;
        for record in state.executions.iter_mut().filter(|e| !e.status.is_terminal()) {
            record.status = ExecutionStatus::Failed;
            record.error_message = Some(reason.to_string());
            record.finished_at = Some(Utc::now());
            count += 1;
        }
        Ok(count)
    }
}
