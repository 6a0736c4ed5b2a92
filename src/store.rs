//! Persistence contract used by the turn engine
//!
//! The orchestrator only talks to `ConversationStore`, so tests can swap
//! in an in-memory implementation.

use crate::db::{
    Database, DbError, DbResult, ExecutionOutcome, Message, NewMessage, NewToolExecution,
    Session, SessionDefaults, ToolExecution,
};
use async_trait::async_trait;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Idempotent: concurrent calls with one id never create two sessions
    async fn resolve_or_create_session(
        &self,
        id: &str,
        defaults: SessionDefaults,
    ) -> DbResult<Session>;

    async fn get_session(&self, id: &str) -> DbResult<Option<Session>>;

    /// Fails with `SessionNotFound` if the session does not exist
    async fn append_message(&self, message: NewMessage) -> DbResult<Message>;

    /// Most recent first, at most `limit`
    async fn list_messages(&self, session_id: &str, limit: usize) -> DbResult<Vec<Message>>;

    /// New record in `pending`
    async fn create_tool_execution(&self, execution: NewToolExecution)
        -> DbResult<ToolExecution>;

    /// Terminal transition; rejects unknown ids and already-terminal records
    async fn update_tool_execution(
        &self,
        id: &str,
        outcome: ExecutionOutcome,
    ) -> DbResult<ToolExecution>;

    async fn get_tool_execution(&self, id: &str) -> DbResult<ToolExecution>;

    async fn list_tool_executions(&self, message_id: &str) -> DbResult<Vec<ToolExecution>>;

    /// Fail all non-terminal records, returning how many were changed
    async fn fail_pending_tool_executions(&self, reason: &str) -> DbResult<usize>;
}

/// Run a synchronous database call on the blocking pool
async fn blocking<T, F>(db: &Database, f: F) -> DbResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| DbError::Task(e.to_string()))?
}

#[async_trait]
impl ConversationStore for Database {
    async fn resolve_or_create_session(
        &self,
        id: &str,
        defaults: SessionDefaults,
    ) -> DbResult<Session> {
        let id = id.to_string();
        blocking(self, move |db| db.resolve_or_create_session(&id, &defaults)).await
    }

    async fn get_session(&self, id: &str) -> DbResult<Option<Session>> {
        let id = id.to_string();
        blocking(self, move |db| db.get_session(&id)).await
    }

    async fn append_message(&self, message: NewMessage) -> DbResult<Message> {
        blocking(self, move |db| db.append_message(&message)).await
    }

    async fn list_messages(&self, session_id: &str, limit: usize) -> DbResult<Vec<Message>> {
        let session_id = session_id.to_string();
        blocking(self, move |db| db.list_messages(&session_id, limit)).await
    }

    async fn create_tool_execution(
        &self,
        execution: NewToolExecution,
    ) -> DbResult<ToolExecution> {
        blocking(self, move |db| db.create_tool_execution(&execution)).await
    }

    async fn update_tool_execution(
        &self,
        id: &str,
        outcome: ExecutionOutcome,
    ) -> DbResult<ToolExecution> {
        let id = id.to_string();
        blocking(self, move |db| db.update_tool_execution(&id, &outcome)).await
    }

    async fn get_tool_execution(&self, id: &str) -> DbResult<ToolExecution> {
        let id = id.to_string();
        blocking(self, move |db| db.get_tool_execution(&id)).await
    }

    async fn list_tool_executions(&self, message_id: &str) -> DbResult<Vec<ToolExecution>> {
        let message_id = message_id.to_string();
        blocking(self, move |db| db.list_tool_executions(&message_id)).await
    }

    async fn fail_pending_tool_executions(&self, reason: &str) -> DbResult<usize> {
        let reason = reason.to_string();
        blocking(self, move |db| db.fail_pending_tool_executions(&reason)).await
    }
}
